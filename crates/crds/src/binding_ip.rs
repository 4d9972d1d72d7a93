//! BindingIp CRD
//!
//! Declares a manual IP/MAC binding inside a named subnet. The controller
//! recomputes `status.valid` on every reconcile: a binding is valid only
//! while the target subnet exists and the address falls inside its range.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metalgrid.io",
    version = "v1alpha1",
    kind = "BindingIp",
    status = "BindingIpStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BindingIpSpec {
    /// Name of the target Subnet resource
    pub subnet: String,

    /// IPv4 address to bind
    pub ip_addr: String,

    /// MAC address to bind, `aa:bb:cc:dd:ee:ff` form
    pub mac_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BindingIpStatus {
    /// Whether the binding is currently taking effect
    pub valid: bool,
}
