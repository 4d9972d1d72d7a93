//! Subnet cache.
//!
//! Last-seen copy of every Subnet resource, used to answer two questions
//! without an API round-trip: does a subnet exist (BindingIp validation),
//! and did a watch event actually change the spec (skip no-op reconciles,
//! since status-only updates echo back through the watch stream).

use crds::Subnet;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct SubnetCache {
    inner: Mutex<HashMap<String, Subnet>>,
}

impl SubnetCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Subnet>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update(&self, name: &str, subnet: Subnet) {
        self.lock().insert(name.to_string(), subnet);
    }

    pub fn remove(&self, name: &str) -> Option<Subnet> {
        self.lock().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Subnet> {
        self.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Whether `subnet` differs in spec from the cached copy. An unknown
    /// subnet counts as changed.
    pub fn has_spec_changed(&self, name: &str, subnet: &Subnet) -> bool {
        match self.lock().get(name) {
            Some(cached) => cached.spec != subnet.spec,
            None => true,
        }
    }
}
