//! BindingIp reconciliation.
//!
//! Each reconcile recomputes `status.valid` — the target subnet must exist
//! and the address must fall inside its allocation range with a well-formed
//! unicast MAC — writes the status back when it changed, updates the
//! registry, and emits binding events toward the fleet so the owning
//! instance rewrites its binding file. Subnet changes re-run the same
//! computation over every binding targeting that subnet, so a binding
//! created ahead of its subnet turns valid once the subnet appears.

use crate::cache::SubnetCache;
use crate::error::ControllerError;
use crate::fleet::BindingEvent;
use crate::registry::BindingRegistry;
use crds::{BindingIp, BindingIpStatus};
use dhcp_server::backoff::{is_conflict, ConflictBackoff};
use dhcp_server::BindingIpInfo;
use iprange::is_valid_unicast_mac;
use kube::api::PostParams;
use kube::Api;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct BindingIpReconciler {
    api: Api<BindingIp>,
    cache: Arc<SubnetCache>,
    registry: Arc<BindingRegistry>,
    binding_tx: tokio::sync::mpsc::Sender<BindingEvent>,
}

/// Whether the binding can take effect: the target subnet is known, the
/// address parses and falls inside the subnet's allocation range, and the
/// MAC is a well-formed unicast address.
fn compute_valid(cache: &SubnetCache, binding: &BindingIp) -> bool {
    let spec = &binding.spec;
    if !is_valid_unicast_mac(&spec.mac_addr) {
        return false;
    }
    let Ok(ip) = spec.ip_addr.parse::<Ipv4Addr>() else {
        return false;
    };
    let Some(subnet) = cache.get(&spec.subnet) else {
        return false;
    };
    iprange::contains(ip, &subnet.spec.ipv4_subnet.ip_range)
}

/// Events needed to move the fleet from `previous` to `next`.
///
/// A replaced binding first retracts the old pairing, then applies the new
/// one; invalid entries only ever produce retractions.
fn transition_events(
    previous: Option<&BindingIpInfo>,
    next: &BindingIpInfo,
) -> Vec<BindingEvent> {
    let mut events = Vec::new();
    if let Some(prev) = previous {
        if prev == next {
            return events;
        }
        if prev.valid {
            events.push(BindingEvent::Deleted(prev.clone()));
        }
    }
    if next.valid {
        events.push(BindingEvent::Added(next.clone()));
    }
    events
}

impl BindingIpReconciler {
    pub fn new(
        api: Api<BindingIp>,
        cache: Arc<SubnetCache>,
        registry: Arc<BindingRegistry>,
        binding_tx: tokio::sync::mpsc::Sender<BindingEvent>,
    ) -> Self {
        Self {
            api,
            cache,
            registry,
            binding_tx,
        }
    }

    pub async fn reconcile(&self, binding: &BindingIp) -> Result<(), ControllerError> {
        let Some(name) = binding.metadata.name.as_deref() else {
            warn!("binding resource without a name, ignoring");
            return Ok(());
        };

        let valid = compute_valid(&self.cache, binding);
        self.update_status(name, binding, valid).await?;

        let info = BindingIpInfo {
            subnet: binding.spec.subnet.clone(),
            ip_addr: binding.spec.ip_addr.clone(),
            mac_addr: binding.spec.mac_addr.clone(),
            valid,
        };
        let previous = self.registry.upsert(name, info.clone());
        for event in transition_events(previous.as_ref(), &info) {
            if self.binding_tx.send(event).await.is_err() {
                warn!(binding = %name, "fleet loop stopped, dropping binding event");
            }
        }
        Ok(())
    }

    /// Re-runs the validity computation for every known binding targeting
    /// `subnet`. Called after a subnet appears, changes, or disappears, so
    /// bindings created ahead of their subnet do not stay invalid forever.
    pub async fn revalidate_subnet(&self, subnet: &str) {
        for name in self.registry.names_by_subnet(subnet) {
            let binding = match self.api.get(&name).await {
                Ok(binding) => binding,
                Err(err) => {
                    warn!(binding = %name, %err, "failed to fetch binding for revalidation");
                    continue;
                }
            };
            if let Err(err) = self.reconcile(&binding).await {
                warn!(binding = %name, %err, "failed to revalidate binding");
            }
        }
    }

    pub async fn handle_deleted(&self, binding: &BindingIp) {
        let Some(name) = binding.metadata.name.as_deref() else {
            return;
        };
        let Some(previous) = self.registry.delete(name) else {
            return;
        };
        info!(binding = %name, ip = %previous.ip_addr, "binding removed");
        if previous.valid
            && self
                .binding_tx
                .send(BindingEvent::Deleted(previous))
                .await
                .is_err()
        {
            warn!(binding = %name, "fleet loop stopped, dropping binding removal");
        }
    }

    /// Writes `status.valid` when it differs from the stored value,
    /// retrying optimistic-concurrency conflicts with bounded backoff.
    async fn update_status(
        &self,
        name: &str,
        binding: &BindingIp,
        valid: bool,
    ) -> Result<(), ControllerError> {
        if binding.status.as_ref().map(|s| s.valid) == Some(valid) {
            return Ok(());
        }
        let mut backoff = ConflictBackoff::for_status_updates();
        loop {
            match self.try_update_status(name, valid).await {
                Ok(()) => return Ok(()),
                Err(err) if is_conflict(&err) => match backoff.next_delay() {
                    Some(delay) => {
                        debug!(binding = %name, ?delay, "status write conflicted, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err.into()),
                },
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn try_update_status(&self, name: &str, valid: bool) -> Result<(), kube::Error> {
        let mut current = self.api.get(name).await?;
        if current.status.as_ref().map(|s| s.valid) == Some(valid) {
            return Ok(());
        }
        current.status = Some(BindingIpStatus { valid });
        let payload = serde_json::to_vec(&current).map_err(kube::Error::SerdeError)?;
        self.api
            .replace_status(name, &PostParams::default(), payload)
            .await?;
        info!(binding = %name, valid, "updated binding status");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{BindingIpSpec, InterfaceSpec, Ipv4SubnetSpec, Subnet, SubnetSpec};
    use kube::core::ObjectMeta;

    fn cache_with_subnet() -> SubnetCache {
        let cache = SubnetCache::new();
        cache.update(
            "sub1",
            Subnet {
                metadata: ObjectMeta {
                    name: Some("sub1".to_string()),
                    ..Default::default()
                },
                spec: SubnetSpec {
                    ipv4_subnet: Ipv4SubnetSpec {
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
        );
        cache
    }

    fn binding(subnet: &str, ip: &str, mac: &str) -> BindingIp {
        BindingIp {
            metadata: ObjectMeta {
                name: Some("b1".to_string()),
                ..Default::default()
            },
            spec: BindingIpSpec {
                subnet: subnet.to_string(),
                ip_addr: ip.to_string(),
                mac_addr: mac.to_string(),
            },
            status: None,
        }
    }

    fn info(ip: &str, mac: &str, valid: bool) -> BindingIpInfo {
        BindingIpInfo {
            subnet: "sub1".to_string(),
            ip_addr: ip.to_string(),
            mac_addr: mac.to_string(),
            valid,
        }
    }

    #[test]
    fn valid_requires_known_subnet_and_covered_ip() {
        let cache = cache_with_subnet();
        assert!(compute_valid(
            &cache,
            &binding("sub1", "10.0.0.20", "aa:bb:cc:dd:ee:ff")
        ));
        // Inside the CIDR but outside the allocation range.
        assert!(!compute_valid(
            &cache,
            &binding("sub1", "10.0.0.200", "aa:bb:cc:dd:ee:ff")
        ));
        // Outside the subnet entirely.
        assert!(!compute_valid(
            &cache,
            &binding("sub1", "10.1.0.20", "aa:bb:cc:dd:ee:ff")
        ));
        // Unknown subnet.
        assert!(!compute_valid(
            &cache,
            &binding("other", "10.0.0.20", "aa:bb:cc:dd:ee:ff")
        ));
        // Multicast MAC.
        assert!(!compute_valid(
            &cache,
            &binding("sub1", "10.0.0.20", "01:00:5e:00:00:01")
        ));
        // Unparsable address.
        assert!(!compute_valid(
            &cache,
            &binding("sub1", "not-an-ip", "aa:bb:cc:dd:ee:ff")
        ));
    }

    #[test]
    fn new_valid_binding_emits_add() {
        let next = info("10.0.0.20", "aa:bb:cc:dd:ee:ff", true);
        let events = transition_events(None, &next);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BindingEvent::Added(i) if i.ip_addr == "10.0.0.20"));
    }

    #[test]
    fn changed_binding_retracts_then_adds() {
        let prev = info("10.0.0.20", "aa:bb:cc:dd:ee:ff", true);
        let next = info("10.0.0.21", "aa:bb:cc:dd:ee:ff", true);
        let events = transition_events(Some(&prev), &next);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], BindingEvent::Deleted(i) if i.ip_addr == "10.0.0.20"));
        assert!(matches!(&events[1], BindingEvent::Added(i) if i.ip_addr == "10.0.0.21"));
    }

    #[test]
    fn unchanged_binding_is_silent() {
        let prev = info("10.0.0.20", "aa:bb:cc:dd:ee:ff", true);
        assert!(transition_events(Some(&prev), &prev.clone()).is_empty());
    }

    #[test]
    fn invalidated_binding_only_retracts() {
        let prev = info("10.0.0.20", "aa:bb:cc:dd:ee:ff", true);
        let next = info("10.0.0.20", "aa:bb:cc:dd:ee:ff", false);
        let events = transition_events(Some(&prev), &next);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BindingEvent::Deleted(_)));
    }

    #[test]
    fn invalid_from_the_start_stays_silent() {
        let next = info("10.1.0.20", "aa:bb:cc:dd:ee:ff", false);
        assert!(transition_events(None, &next).is_empty());
    }

    #[test]
    fn binding_turning_valid_emits_add() {
        // A binding created before its subnet: revalidation flips it to
        // valid and must announce it to the fleet.
        let prev = info("10.0.0.20", "aa:bb:cc:dd:ee:ff", false);
        let next = info("10.0.0.20", "aa:bb:cc:dd:ee:ff", true);
        let events = transition_events(Some(&prev), &next);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BindingEvent::Added(_)));
    }
}
