//! Per-subnet DHCP service runtime.
//!
//! Each `Subnet` resource assigned to this node is served by one
//! [`DhcpServerInstance`]: a dedicated dnsmasq process bound to a managed
//! sub-interface, fed a generated config plus a `dhcp-host` binding file,
//! and monitored for liveness and lease-file churn. Observed clients and
//! departures are announced on channels for the discovery layer, and
//! aggregate counters are published back to the resource status.

pub mod backoff;
pub mod bindings;
pub mod config;
pub mod daemon;
pub mod error;
pub mod instance;
pub mod interface;
pub mod lease;
mod status;
pub mod types;

pub use daemon::{DaemonHandle, DaemonLauncher, DnsmasqLauncher};
pub use error::DhcpError;
pub use instance::{DhcpServerInstance, InstanceState};
pub use types::{AgentSettings, BindingIpInfo, DhcpClientInfo, InstancePaths};
