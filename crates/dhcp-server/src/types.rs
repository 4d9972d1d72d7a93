//! Shared data types for the DHCP server and its consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One observed DHCP client, keyed by IP within a subnet's tables.
///
/// Built from lease-file lines and from binding events; the lease file
/// itself remains the source of truth across daemon restarts, these records
/// are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpClientInfo {
    pub mac: String,
    pub ip: String,
    pub hostname: String,
    /// False once the client has disappeared from the lease table
    pub active: bool,
    pub dhcp_expire_time: Option<DateTime<Utc>>,
    /// Subnet CIDR the client belongs to
    pub subnet: String,
    /// Name of the owning Subnet resource
    pub subnet_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
}

/// A manual IP/MAC binding sourced from a BindingIp resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingIpInfo {
    /// Name of the target Subnet resource
    pub subnet: String,
    pub ip_addr: String,
    pub mac_addr: String,
    /// Derived: the subnet exists and the address is inside its range
    pub valid: bool,
}

/// Process-level settings every instance shares: storage roots, the config
/// template, and the identity published into subnet status.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Name of the node hosting this agent, published to subnet status
    pub node_name: String,
    /// Directory for generated dnsmasq config and binding files
    pub config_dir: PathBuf,
    /// Directory for daemon lease files
    pub lease_dir: PathBuf,
    /// Directory for daemon log files
    pub log_dir: PathBuf,
    /// TFTP asset root handed to the daemon when PXE is enabled
    pub tftp_dir: PathBuf,
    /// Optional custom dnsmasq config template; embedded default otherwise
    pub config_template: Option<PathBuf>,
}

/// Per-subnet file locations derived from [`AgentSettings`].
#[derive(Debug, Clone)]
pub struct InstancePaths {
    pub config_file: PathBuf,
    pub lease_file: PathBuf,
    pub log_file: PathBuf,
    pub bindings_file: PathBuf,
    pub tftp_dir: PathBuf,
}

impl InstancePaths {
    pub fn for_subnet(settings: &AgentSettings, subnet_name: &str) -> Self {
        Self {
            config_file: settings.config_dir.join(format!("{subnet_name}.conf")),
            lease_file: settings.lease_dir.join(format!("{subnet_name}.leases")),
            log_file: settings.log_dir.join(format!("{subnet_name}.log")),
            bindings_file: settings
                .config_dir
                .join(format!("{subnet_name}-bindings.conf")),
            tftp_dir: settings.tftp_dir.clone(),
        }
    }

    /// Directory watched for lease-file writes.
    pub fn lease_dir(&self) -> &Path {
        self.lease_file.parent().unwrap_or_else(|| Path::new("."))
    }
}
