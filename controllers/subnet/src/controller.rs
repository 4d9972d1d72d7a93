//! Main controller implementation.
//!
//! Wires the fleet manager, the BindingIp reconciler, and the resource
//! watchers together and runs them until shutdown.

use crate::bindingip::BindingIpReconciler;
use crate::cache::SubnetCache;
use crate::error::ControllerError;
use crate::fleet::{FleetManager, Role};
use crate::registry::BindingRegistry;
use crate::watcher::Watcher;
use crds::{BindingIp, Subnet};
use dhcp_server::{AgentSettings, DnsmasqLauncher};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Capacity of the fleet's cross-module event channels. Producers never
/// block; a full queue drops the event with a warning.
const EVENT_QUEUE_CAPACITY: usize = 1024;

pub struct Controller {
    fleet: Arc<FleetManager>,
    fleet_loop: JoinHandle<()>,
    subnet_watcher: JoinHandle<Result<(), ControllerError>>,
    binding_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    pub async fn new(settings: AgentSettings) -> Result<Self, ControllerError> {
        info!("Initializing subnet controller");

        let kube_client = Client::try_default().await?;
        let subnet_api: Api<Subnet> = Api::all(kube_client.clone());
        let binding_api: Api<BindingIp> = Api::all(kube_client);

        let settings = Arc::new(settings);
        let registry = Arc::new(BindingRegistry::new());
        let cache = Arc::new(SubnetCache::new());

        let (binding_tx, binding_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (deleted_host_tx, deleted_host_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (client_added_tx, client_added_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (client_deleted_tx, client_deleted_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let fleet = Arc::new(FleetManager::new(
            settings,
            subnet_api.clone(),
            Arc::new(DnsmasqLauncher),
            Arc::clone(&registry),
            Arc::clone(&cache),
            binding_tx.clone(),
            deleted_host_tx,
            client_added_tx,
            client_deleted_tx,
        ));

        // The agent runs as a single replica per node, so this process is
        // always the leader for the subnets it hosts.
        fleet.set_role(Role::Leader);

        // Start instances for everything that already exists before any
        // queued events are processed.
        fleet.resync().await?;

        let fleet_loop = tokio::spawn(Arc::clone(&fleet).run(
            binding_rx,
            deleted_host_rx,
            client_added_rx,
            client_deleted_rx,
        ));

        let reconciler = Arc::new(BindingIpReconciler::new(
            binding_api.clone(),
            cache,
            registry,
            binding_tx,
        ));
        let watcher = Arc::new(Watcher::new(
            Arc::clone(&fleet),
            reconciler,
            subnet_api,
            binding_api,
        ));

        let subnet_watcher = tokio::spawn({
            let watcher = Arc::clone(&watcher);
            async move { watcher.watch_subnets().await }
        });
        let binding_watcher = tokio::spawn(async move { watcher.watch_binding_ips().await });

        Ok(Self {
            fleet,
            fleet_loop,
            subnet_watcher,
            binding_watcher,
        })
    }

    /// Runs until a watcher fails or a shutdown signal arrives, then stops
    /// every instance.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Subnet controller running");

        let result = tokio::select! {
            result = &mut self.subnet_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Subnet watcher panicked: {e}")))
                    .and_then(|r| r)
            }
            result = &mut self.binding_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("BindingIp watcher panicked: {e}")))
                    .and_then(|r| r)
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                Ok(())
            }
        };

        self.subnet_watcher.abort();
        self.binding_watcher.abort();
        self.fleet_loop.abort();
        self.fleet.shutdown().await;

        result
    }
}
