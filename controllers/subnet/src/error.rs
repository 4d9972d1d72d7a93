//! Controller error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// DHCP server instance error
    #[error("DHCP server error: {0}")]
    Dhcp(#[from] dhcp_server::DhcpError),

    /// Invalid or missing configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Watch stream failure
    #[error("watch error: {0}")]
    Watch(String),
}
