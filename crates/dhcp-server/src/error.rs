//! Error types for the per-subnet DHCP server.

use thiserror::Error;

/// Errors that can occur while managing a DHCP server instance.
#[derive(Debug, Error)]
pub enum DhcpError {
    /// Filesystem error on config, lease, or binding files
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config template failed to parse or render
    #[error("config template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Status payload failed to serialize
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// IP range expression error in the subnet spec
    #[error("IP range error: {0}")]
    IpRange(#[from] iprange::IpRangeError),

    /// The base network interface named by the subnet spec does not exist
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// Interface provisioning command failed
    #[error("interface provisioning failed: {0}")]
    InterfaceSetup(String),

    /// The daemon process could not be spawned or died immediately
    #[error("failed to start dhcp daemon: {0}")]
    DaemonSpawn(String),

    /// Signalling the daemon process failed
    #[error("failed to signal dhcp daemon: {0}")]
    DaemonSignal(String),

    /// Lease-file watch could not be established
    #[error("lease watch error: {0}")]
    LeaseWatch(String),

    /// The subnet resource is missing a required field
    #[error("invalid subnet resource: {0}")]
    InvalidSubnet(String),
}
