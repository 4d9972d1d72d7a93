//! Subnet CRD
//!
//! One `Subnet` resource declares one network segment served by a dedicated
//! dnsmasq instance: the CIDR and lease ranges, the host interface the
//! server binds to, and per-subnet feature toggles.
//!
//! Invariants enforced at admission time (not re-checked here): the
//! `subnet`, `interface.interface`, `interface.vlanId` and `interface.ipv4`
//! fields are immutable after creation, and `ipRange` may only ever be
//! expanded so that previously covered addresses remain covered.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metalgrid.io",
    version = "v1alpha1",
    kind = "Subnet",
    status = "SubnetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// IPv4 network configuration
    pub ipv4_subnet: Ipv4SubnetSpec,

    /// Host network interface configuration
    pub interface: InterfaceSpec,

    /// Feature toggles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ipv4SubnetSpec {
    /// Subnet CIDR, e.g. `192.168.1.0/24`
    pub subnet: String,

    /// Comma-separated lease ranges, e.g. `192.168.1.10-192.168.1.50,192.168.1.99`
    pub ip_range: String,

    /// Gateway option handed to DHCP clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// DNS option handed to DHCP clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSpec {
    /// Base host interface the DHCP server attaches to
    pub interface: String,

    /// VLAN ID (1-4094); absent or 0 selects a macvlan sub-interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<i32>,

    /// Self IPv4/CIDR assigned to the provisioned sub-interface
    pub ipv4: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSpec {
    /// Persist every active lease as a dhcp-host binding
    #[serde(default)]
    pub enable_bind_dhcp_ip: bool,

    /// Enable PXE boot options in the generated config
    #[serde(default)]
    pub enable_pxe: bool,

    /// Enable ZTP switch provisioning options in the generated config
    #[serde(default)]
    pub enable_ztp: bool,

    /// Host-discovery endpoint synchronisation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_sync_endpoint: Option<SyncEndpointSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncEndpointSpec {
    /// Create a host record per discovered DHCP client
    #[serde(default)]
    pub dhcp_client: bool,

    /// Cluster name stamped onto discovered clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cluster_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    /// Aggregate DHCP counters, published by the owning server instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_status: Option<DhcpStatus>,

    /// Name of the node currently hosting the DHCP server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_node: Option<String>,

    /// Latest observed conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<SubnetCondition>,

    /// JSON map of client details keyed by IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_client_details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DhcpStatus {
    /// Total number of addresses covered by the ip range
    pub dhcp_ip_total_amount: u64,

    /// Addresses neither leased nor bound
    pub dhcp_ip_available_amount: u64,

    /// Addresses with an active lease
    pub dhcp_ip_active_amount: u64,

    /// Addresses bound through a BindingIp resource
    pub dhcp_ip_manual_bind_amount: u64,

    /// Addresses bound automatically from active leases
    pub dhcp_ip_auto_bind_amount: u64,

    /// Total bound addresses (manual + auto, each IP counted once)
    pub dhcp_ip_bind_amount: u64,
}

/// A single status condition on a Subnet.
///
/// Kept self-contained (rather than reusing `metav1.Condition`) so the CRD
/// schema derives cleanly from this crate alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetCondition {
    /// Condition type, e.g. `DhcpServer`
    pub r#type: String,

    /// `True` / `False`
    pub status: String,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// RFC 3339 transition timestamp
    pub last_transition_time: String,
}
