//! Metalgrid CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the subnet operator:
//! `Subnet` describes one DHCP-served network segment, `BindingIp`
//! declares a manual IP/MAC binding inside a subnet.

pub mod binding_ip;
pub mod subnet;

pub use binding_ip::*;
pub use subnet::*;
