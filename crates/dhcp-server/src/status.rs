//! Debounced subnet status publication.
//!
//! Every table mutation marks the status dirty; the worker coalesces those
//! wakeups onto a one-second tick, so a burst of lease churn produces at
//! most one write per second. Writes go through `replace_status`, and an
//! optimistic-concurrency conflict is retried with bounded backoff while
//! any other failure abandons the attempt until the next dirty mark.

use crate::backoff::{is_conflict, ConflictBackoff};
use crate::error::DhcpError;
use crate::instance::{InstanceData, InstanceShared};
use chrono::Utc;
use crds::{DhcpStatus, Subnet, SubnetCondition};
use iprange::count_addresses;
use kube::api::PostParams;
use kube::Api;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

/// One entry in the `dhcpClientDetails` JSON map, keyed by IP.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientDetail {
    mac: String,
    hostname: String,
    manual_bind: bool,
    auto_bind: bool,
}

pub(crate) async fn run_status_worker(
    shared: Arc<InstanceShared>,
    api: Api<Subnet>,
    mut dirty_rx: mpsc::Receiver<()>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut pending = false;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => return,
            maybe = dirty_rx.recv() => {
                if maybe.is_none() {
                    return;
                }
                pending = true;
            }
            _ = ticker.tick() => {
                if pending {
                    pending = false;
                    if let Err(err) = publish_status(&shared, &api).await {
                        error!(subnet = %shared.subnet_name, %err, "failed to publish subnet status");
                    }
                }
            }
        }
    }
}

/// Publishes the current status, retrying conflicts with bounded backoff.
pub(crate) async fn publish_status(
    shared: &InstanceShared,
    api: &Api<Subnet>,
) -> Result<(), DhcpError> {
    let mut backoff = ConflictBackoff::for_status_updates();
    loop {
        match try_publish(shared, api).await {
            Ok(()) => return Ok(()),
            Err(DhcpError::Kube(err)) if is_conflict(&err) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(subnet = %shared.subnet_name, ?delay, "status write conflicted, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(DhcpError::Kube(err)),
            },
            Err(err) => return Err(err),
        }
    }
}

async fn try_publish(shared: &InstanceShared, api: &Api<Subnet>) -> Result<(), DhcpError> {
    let current = api.get(&shared.subnet_name).await?;

    let (dhcp_status, details) = {
        let data = shared.lock_data();
        compute_status(&data)?
    };

    let mut status = current.status.clone().unwrap_or_default();
    status.dhcp_status = Some(dhcp_status);
    status.dhcp_client_details = Some(details);

    let node = shared.settings.node_name.as_str();
    if status.host_node.as_deref() != Some(node) {
        status.host_node = Some(node.to_string());
        status.conditions.push(SubnetCondition {
            r#type: "DhcpServer".to_string(),
            status: "True".to_string(),
            reason: "hostChange".to_string(),
            message: format!("dhcp server hosted on node {node}"),
            last_transition_time: Utc::now().to_rfc3339(),
        });
    }

    if current.status.as_ref() == Some(&status) {
        debug!(subnet = %shared.subnet_name, "status unchanged, skipping write");
        return Ok(());
    }

    let mut updated = current;
    updated.status = Some(status);
    api.replace_status(
        &shared.subnet_name,
        &PostParams::default(),
        serde_json::to_vec(&updated)?,
    )
    .await?;
    debug!(subnet = %shared.subnet_name, "published subnet status");
    Ok(())
}

/// Derives the aggregate counters and the client-details JSON from the
/// current tables.
fn compute_status(data: &InstanceData) -> Result<(DhcpStatus, String), DhcpError> {
    let mut details: BTreeMap<String, ClientDetail> = BTreeMap::new();

    for (ip, client) in &data.lease_clients {
        details.insert(
            ip.clone(),
            ClientDetail {
                mac: client.mac.clone(),
                hostname: client.hostname.clone(),
                manual_bind: false,
                auto_bind: false,
            },
        );
    }
    for (ip, client) in &data.auto_bindings {
        let entry = details.entry(ip.clone()).or_insert_with(|| ClientDetail {
            mac: client.mac.clone(),
            hostname: client.hostname.clone(),
            manual_bind: false,
            auto_bind: false,
        });
        entry.mac = client.mac.clone();
        entry.auto_bind = true;
    }
    for (ip, client) in &data.manual_bindings {
        let entry = details.entry(ip.clone()).or_insert_with(|| ClientDetail {
            mac: client.mac.clone(),
            hostname: client.hostname.clone(),
            manual_bind: false,
            auto_bind: false,
        });
        entry.mac = client.mac.clone();
        entry.manual_bind = true;
    }

    let range = &data.subnet.spec.ipv4_subnet.ip_range;
    let total = match count_addresses(range) {
        Ok(total) => total,
        Err(err) => {
            warn!(range = %range, %err, "failed to count addresses in ip range");
            0
        }
    };

    let manual = data.manual_bindings.len() as u64;
    let auto = data
        .auto_bindings
        .keys()
        .filter(|ip| !data.manual_bindings.contains_key(*ip))
        .count() as u64;
    let used = details.len() as u64;

    let status = DhcpStatus {
        dhcp_ip_total_amount: total,
        dhcp_ip_available_amount: total.saturating_sub(used),
        dhcp_ip_active_amount: data.lease_clients.len() as u64,
        dhcp_ip_manual_bind_amount: manual,
        dhcp_ip_auto_bind_amount: auto,
        dhcp_ip_bind_amount: manual + auto,
    };
    Ok((status, serde_json::to_string(&details)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceState;
    use crate::types::DhcpClientInfo;
    use crds::{InterfaceSpec, Ipv4SubnetSpec, SubnetSpec};
    use kube::core::ObjectMeta;
    use std::collections::HashMap;

    fn client(ip: &str, mac: &str, hostname: &str) -> DhcpClientInfo {
        DhcpClientInfo {
            mac: mac.to_string(),
            ip: ip.to_string(),
            hostname: hostname.to_string(),
            active: true,
            dhcp_expire_time: None,
            subnet: "10.0.0.0/24".to_string(),
            subnet_name: "sub1".to_string(),
            cluster_name: None,
        }
    }

    fn data() -> InstanceData {
        InstanceData {
            subnet: Subnet {
                metadata: ObjectMeta {
                    name: Some("sub1".to_string()),
                    ..Default::default()
                },
                spec: SubnetSpec {
                    ipv4_subnet: Ipv4SubnetSpec {
                        // 41 addresses
                        subnet: "10.0.0.0/24".to_string(),
                        ip_range: "10.0.0.10-10.0.0.50".to_string(),
                        gateway: None,
                        dns: None,
                    },
                    interface: InterfaceSpec {
                        interface: "eth0".to_string(),
                        vlan_id: None,
                        ipv4: "10.0.0.2/24".to_string(),
                    },
                    feature: None,
                },
                status: None,
            },
            state: InstanceState::Running,
            lease_clients: HashMap::new(),
            manual_bindings: HashMap::new(),
            auto_bindings: HashMap::new(),
        }
    }

    #[test]
    fn counters_separate_manual_and_auto() {
        let mut d = data();
        // Leased and auto-bound.
        d.lease_clients
            .insert("10.0.0.12".into(), client("10.0.0.12", "aa:01", "node-a"));
        d.auto_bindings
            .insert("10.0.0.12".into(), client("10.0.0.12", "aa:01", "node-a"));
        // Auto binding surviving a departed lease.
        d.auto_bindings
            .insert("10.0.0.13".into(), client("10.0.0.13", "aa:02", ""));
        // Manual binding shadowing an auto one, plus a standalone manual.
        d.manual_bindings
            .insert("10.0.0.13".into(), client("10.0.0.13", "bb:02", ""));
        d.manual_bindings
            .insert("10.0.0.20".into(), client("10.0.0.20", "bb:03", ""));

        let (status, details) = compute_status(&d).unwrap();
        assert_eq!(status.dhcp_ip_total_amount, 41);
        assert_eq!(status.dhcp_ip_active_amount, 1);
        assert_eq!(status.dhcp_ip_manual_bind_amount, 2);
        // 10.0.0.13 counts as manual, not auto.
        assert_eq!(status.dhcp_ip_auto_bind_amount, 1);
        assert_eq!(status.dhcp_ip_bind_amount, 3);
        // Three distinct IPs in use.
        assert_eq!(status.dhcp_ip_available_amount, 41 - 3);

        let parsed: serde_json::Value = serde_json::from_str(&details).unwrap();
        assert_eq!(parsed["10.0.0.12"]["autoBind"], true);
        assert_eq!(parsed["10.0.0.12"]["manualBind"], false);
        assert_eq!(parsed["10.0.0.12"]["hostname"], "node-a");
        // Manual MAC wins in the published detail.
        assert_eq!(parsed["10.0.0.13"]["mac"], "bb:02");
        assert_eq!(parsed["10.0.0.13"]["manualBind"], true);
        assert_eq!(parsed["10.0.0.20"]["manualBind"], true);
    }

    #[test]
    fn empty_tables_publish_zeroes() {
        let (status, details) = compute_status(&data()).unwrap();
        assert_eq!(status.dhcp_ip_total_amount, 41);
        assert_eq!(status.dhcp_ip_available_amount, 41);
        assert_eq!(status.dhcp_ip_bind_amount, 0);
        assert_eq!(details, "{}");
    }

    #[test]
    fn bad_range_counts_zero_total() {
        let mut d = data();
        d.subnet.spec.ipv4_subnet.ip_range = "not-a-range".to_string();
        let (status, _) = compute_status(&d).unwrap();
        assert_eq!(status.dhcp_ip_total_amount, 0);
        assert_eq!(status.dhcp_ip_available_amount, 0);
    }
}
