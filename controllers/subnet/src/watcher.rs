//! Kubernetes resource watchers.
//!
//! Watches Subnet and BindingIp resources and forwards every change to the
//! fleet manager and the BindingIp reconciler. Subnets are watched before
//! bindings so that validation has a populated subnet cache to consult.

use crate::bindingip::BindingIpReconciler;
use crate::error::ControllerError;
use crate::fleet::FleetManager;
use crds::{BindingIp, Subnet};
use futures::TryStreamExt;
use kube::Api;
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Watcher {
    fleet: Arc<FleetManager>,
    binding_reconciler: Arc<BindingIpReconciler>,
    subnet_api: Api<Subnet>,
    binding_api: Api<BindingIp>,
}

impl Watcher {
    pub fn new(
        fleet: Arc<FleetManager>,
        binding_reconciler: Arc<BindingIpReconciler>,
        subnet_api: Api<Subnet>,
        binding_api: Api<BindingIp>,
    ) -> Self {
        Self {
            fleet,
            binding_reconciler,
            subnet_api,
            binding_api,
        }
    }

    /// Starts watching Subnet resources.
    pub async fn watch_subnets(&self) -> Result<(), ControllerError> {
        info!("Starting Subnet watcher");

        let mut stream = Box::pin(watcher(self.subnet_api.clone(), watcher::Config::default()));

        loop {
            // The watcher stream resumes after errors; a bad tick is
            // logged, not fatal.
            let event = match stream.try_next().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    warn!("Subnet watch stream error: {}", e);
                    continue;
                }
            };
            match event {
                watcher::Event::Apply(subnet) => {
                    let name = subnet.metadata.name.as_deref().unwrap_or("<unknown>");
                    info!("Subnet applied: {}", name);

                    if let Err(e) = self.fleet.reconcile_subnet(subnet.clone()).await {
                        error!("Failed to reconcile Subnet {}: {}", name, e);
                    } else {
                        self.binding_reconciler.revalidate_subnet(name).await;
                    }
                }
                watcher::Event::Delete(subnet) => {
                    let name = subnet.metadata.name.as_deref().unwrap_or("<unknown>");
                    info!("Subnet deleted: {}", name);

                    self.fleet.handle_subnet_deleted(name).await;
                    self.binding_reconciler.revalidate_subnet(name).await;
                }
                watcher::Event::Init => {
                    info!("Subnet watcher initialized");
                }
                watcher::Event::InitApply(subnet) => {
                    let name = subnet.metadata.name.as_deref().unwrap_or("<unknown>");
                    debug!("Subnet init apply: {}", name);

                    if let Err(e) = self.fleet.reconcile_subnet(subnet.clone()).await {
                        warn!("Failed to reconcile Subnet {}: {}", name, e);
                    } else {
                        self.binding_reconciler.revalidate_subnet(name).await;
                    }
                }
                watcher::Event::InitDone => {
                    info!("Subnet watcher initialization complete");
                }
            }
        }

        Ok(())
    }

    /// Starts watching BindingIp resources.
    pub async fn watch_binding_ips(&self) -> Result<(), ControllerError> {
        info!("Starting BindingIp watcher");

        let mut stream = Box::pin(watcher(
            self.binding_api.clone(),
            watcher::Config::default(),
        ));

        loop {
            let event = match stream.try_next().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    warn!("BindingIp watch stream error: {}", e);
                    continue;
                }
            };
            match event {
                watcher::Event::Apply(binding) => {
                    let name = binding.metadata.name.as_deref().unwrap_or("<unknown>");
                    info!("BindingIp applied: {}", name);

                    if let Err(e) = self.binding_reconciler.reconcile(&binding).await {
                        error!("Failed to reconcile BindingIp {}: {}", name, e);
                    }
                }
                watcher::Event::Delete(binding) => {
                    let name = binding.metadata.name.as_deref().unwrap_or("<unknown>");
                    info!("BindingIp deleted: {}", name);

                    self.binding_reconciler.handle_deleted(&binding).await;
                }
                watcher::Event::Init => {
                    debug!("BindingIp watcher initialized");
                }
                watcher::Event::InitApply(binding) => {
                    let name = binding.metadata.name.as_deref().unwrap_or("<unknown>");
                    debug!("BindingIp init apply: {}", name);

                    if let Err(e) = self.binding_reconciler.reconcile(&binding).await {
                        warn!("Failed to reconcile BindingIp {}: {}", name, e);
                    }
                }
                watcher::Event::InitDone => {
                    debug!("BindingIp watcher initialization complete");
                }
            }
        }

        Ok(())
    }
}
