//! Binding registry.
//!
//! In-memory view of every BindingIp resource, keyed by resource name.
//! The registry is the lookup layer between the BindingIp reconciler and
//! the fleet manager: reconciles write through it, instance startup reads
//! the manual bindings of its subnet out of it. All reads return clones,
//! so callers never observe later mutations through a snapshot.

use dhcp_server::BindingIpInfo;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct BindingRegistry {
    inner: Mutex<HashMap<String, BindingIpInfo>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BindingIpInfo>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the entry for `name`, returning the previous one.
    pub fn upsert(&self, name: &str, info: BindingIpInfo) -> Option<BindingIpInfo> {
        self.lock().insert(name.to_string(), info)
    }

    /// Removes the entry for `name`, returning it if present.
    pub fn delete(&self, name: &str) -> Option<BindingIpInfo> {
        self.lock().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<BindingIpInfo> {
        self.lock().get(name).cloned()
    }

    pub fn all(&self) -> Vec<BindingIpInfo> {
        self.lock().values().cloned().collect()
    }

    /// Every binding targeting the named subnet.
    pub fn by_subnet(&self, subnet: &str) -> Vec<BindingIpInfo> {
        self.lock()
            .values()
            .filter(|info| info.subnet == subnet)
            .cloned()
            .collect()
    }

    /// Resource names of every binding targeting the named subnet.
    pub fn names_by_subnet(&self, subnet: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, info)| info.subnet == subnet)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(subnet: &str, ip: &str) -> BindingIpInfo {
        BindingIpInfo {
            subnet: subnet.to_string(),
            ip_addr: ip.to_string(),
            mac_addr: "aa:bb:cc:dd:ee:ff".to_string(),
            valid: true,
        }
    }

    #[test]
    fn upsert_returns_previous_entry() {
        let registry = BindingRegistry::new();
        assert!(registry.upsert("b1", info("sub1", "10.0.0.5")).is_none());
        let previous = registry.upsert("b1", info("sub1", "10.0.0.6"));
        assert_eq!(previous.map(|p| p.ip_addr), Some("10.0.0.5".to_string()));
    }

    #[test]
    fn by_subnet_filters() {
        let registry = BindingRegistry::new();
        registry.upsert("b1", info("sub1", "10.0.0.5"));
        registry.upsert("b2", info("sub2", "10.1.0.5"));
        registry.upsert("b3", info("sub1", "10.0.0.6"));

        let mut ips: Vec<String> = registry
            .by_subnet("sub1")
            .into_iter()
            .map(|i| i.ip_addr)
            .collect();
        ips.sort();
        assert_eq!(ips, vec!["10.0.0.5", "10.0.0.6"]);
    }

    #[test]
    fn names_by_subnet_returns_resource_names() {
        let registry = BindingRegistry::new();
        registry.upsert("b1", info("sub1", "10.0.0.5"));
        registry.upsert("b2", info("sub2", "10.1.0.5"));

        assert_eq!(registry.names_by_subnet("sub1"), vec!["b1"]);
        assert!(registry.names_by_subnet("sub3").is_empty());
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let registry = BindingRegistry::new();
        registry.upsert("b1", info("sub1", "10.0.0.5"));

        let snapshot = registry.get("b1").unwrap();
        registry.upsert("b1", info("sub1", "10.0.0.9"));
        assert_eq!(snapshot.ip_addr, "10.0.0.5");
        assert_eq!(registry.get("b1").unwrap().ip_addr, "10.0.0.9");
    }

    #[test]
    fn delete_removes_entry() {
        let registry = BindingRegistry::new();
        registry.upsert("b1", info("sub1", "10.0.0.5"));
        assert!(registry.delete("b1").is_some());
        assert!(registry.delete("b1").is_none());
        assert!(registry.all().is_empty());
    }
}
