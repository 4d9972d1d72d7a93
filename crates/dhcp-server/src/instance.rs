//! Per-subnet DHCP server instance.
//!
//! One instance owns one dnsmasq process end to end: it provisions the
//! service sub-interface, synthesizes the config and binding files, spawns
//! the daemon, and then runs a single event loop that serializes every
//! mutation for the subnet. Lease-file writes, manual binding changes,
//! departed-host removals, spec updates, and liveness probes all arrive as
//! events on that loop; each iteration decides between regenerating the
//! config, reloading the daemon with SIGHUP, or restarting it outright.
//!
//! Producers feed the loop through bounded channels with `try_send`, so a
//! wedged instance can never block the fleet manager or the lease watcher.
//! Steady-state I/O failures are logged and the loop keeps going; only
//! startup failures surface as errors.

use crate::bindings::merge_binding_lines;
use crate::config::{write_atomically, ConfigRenderer};
use crate::daemon::{DaemonHandle, DaemonLauncher};
use crate::error::DhcpError;
use crate::interface::InterfaceProvisioner;
use crate::lease::{diff_lease_tables, parse_lease_table, LeaseContext};
use crate::status::run_status_worker;
use crate::types::{AgentSettings, BindingIpInfo, DhcpClientInfo, InstancePaths};
use crds::Subnet;
use kube::Api;
use notify::Watcher;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the per-instance event channels. Producers use `try_send`
/// and drop on overflow rather than blocking.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How often the daemon process is probed for liveness.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(3);

/// Lifecycle state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Stopped,
    Starting,
    Running,
    Reloading,
    Restarting,
}

/// Mutable per-subnet tables, guarded by [`InstanceShared::data`].
///
/// The lock is a plain mutex and is never held across an await point;
/// snapshots are taken under it and file I/O happens outside.
pub(crate) struct InstanceData {
    pub(crate) subnet: Subnet,
    pub(crate) state: InstanceState,
    /// Active leases keyed by IP
    pub(crate) lease_clients: HashMap<String, DhcpClientInfo>,
    /// Manual bindings keyed by IP, sourced from BindingIp resources
    pub(crate) manual_bindings: HashMap<String, DhcpClientInfo>,
    /// Lease-derived bindings keyed by IP
    pub(crate) auto_bindings: HashMap<String, DhcpClientInfo>,
}

/// State shared between the instance handle, the event loop, and the
/// status worker.
pub(crate) struct InstanceShared {
    pub(crate) subnet_name: String,
    pub(crate) settings: Arc<AgentSettings>,
    pub(crate) paths: InstancePaths,
    pub(crate) data: StdMutex<InstanceData>,
    /// Serializes config and binding-file writes
    pub(crate) config_lock: TokioMutex<()>,
    /// Discovery channel: clients that appeared or changed
    pub(crate) client_added_tx: mpsc::Sender<DhcpClientInfo>,
    /// Discovery channel: clients that vanished from the lease table
    pub(crate) client_deleted_tx: mpsc::Sender<DhcpClientInfo>,
    /// Wakeups for the debounced status worker
    pub(crate) status_tx: mpsc::Sender<()>,
}

impl InstanceShared {
    pub(crate) fn lock_data(&self) -> MutexGuard<'_, InstanceData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flags the subnet status as stale. Dropped wakeups are harmless; the
    /// worker coalesces them anyway.
    pub(crate) fn mark_dirty(&self) {
        let _ = self.status_tx.try_send(());
    }

    fn lease_context(&self) -> LeaseContext {
        let data = self.lock_data();
        let spec = &data.subnet.spec;
        LeaseContext {
            subnet: spec.ipv4_subnet.subnet.clone(),
            subnet_name: self.subnet_name.clone(),
            cluster_name: spec
                .feature
                .as_ref()
                .and_then(|f| f.enable_sync_endpoint.as_ref())
                .and_then(|s| s.default_cluster_name.clone()),
        }
    }

    fn bind_dhcp_ip_enabled(&self) -> bool {
        let data = self.lock_data();
        data.subnet
            .spec
            .feature
            .as_ref()
            .is_some_and(|f| f.enable_bind_dhcp_ip)
    }
}

/// The complete binding set: every auto binding plus every manual binding,
/// with manual entries winning per IP.
fn full_binding_set(data: &InstanceData) -> BTreeMap<String, DhcpClientInfo> {
    let mut set: BTreeMap<String, DhcpClientInfo> = data
        .auto_bindings
        .iter()
        .map(|(ip, client)| (ip.clone(), client.clone()))
        .collect();
    for (ip, client) in &data.manual_bindings {
        set.insert(ip.clone(), client.clone());
    }
    set
}

/// Applies `added`/`deleted` against the binding file on disk under the
/// config lock. A missing file counts as empty.
async fn update_binding_file(
    shared: &InstanceShared,
    added: BTreeMap<String, DhcpClientInfo>,
    deleted: HashMap<String, DhcpClientInfo>,
) -> Result<(), DhcpError> {
    let _guard = shared.config_lock.lock().await;
    let existing = match fs::read_to_string(&shared.paths.bindings_file) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };
    let content = merge_binding_lines(&existing, &added, &deleted);
    write_atomically(&shared.paths.bindings_file, &content)?;
    debug!(subnet = %shared.subnet_name, added = added.len(), deleted = deleted.len(), "updated binding file");
    Ok(())
}

struct EventReceivers {
    binding_added_rx: mpsc::Receiver<Vec<BindingIpInfo>>,
    binding_deleted_rx: mpsc::Receiver<Vec<BindingIpInfo>>,
    deleted_host_rx: mpsc::Receiver<DhcpClientInfo>,
    spec_update_rx: mpsc::Receiver<()>,
}

struct Receivers {
    events: EventReceivers,
    status_rx: mpsc::Receiver<()>,
}

/// Handle on one per-subnet DHCP server.
///
/// Created by the fleet manager, started once with [`run`](Self::run), and
/// fed through the non-blocking event methods afterwards.
pub struct DhcpServerInstance {
    shared: Arc<InstanceShared>,
    api: Api<Subnet>,
    launcher: Arc<dyn DaemonLauncher>,
    renderer: Arc<ConfigRenderer>,
    provisioner: InterfaceProvisioner,
    binding_added_tx: mpsc::Sender<Vec<BindingIpInfo>>,
    binding_deleted_tx: mpsc::Sender<Vec<BindingIpInfo>>,
    deleted_host_tx: mpsc::Sender<DhcpClientInfo>,
    spec_update_tx: mpsc::Sender<()>,
    stop_tx: watch::Sender<bool>,
    receivers: StdMutex<Option<Receivers>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl DhcpServerInstance {
    pub fn new(
        settings: Arc<AgentSettings>,
        subnet: Subnet,
        api: Api<Subnet>,
        launcher: Arc<dyn DaemonLauncher>,
        client_added_tx: mpsc::Sender<DhcpClientInfo>,
        client_deleted_tx: mpsc::Sender<DhcpClientInfo>,
    ) -> Result<Self, DhcpError> {
        let name = subnet
            .metadata
            .name
            .clone()
            .ok_or_else(|| DhcpError::InvalidSubnet("subnet resource has no name".to_string()))?;
        let renderer = Arc::new(ConfigRenderer::new(&settings)?);
        let paths = InstancePaths::for_subnet(&settings, &name);

        let (status_tx, status_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (binding_added_tx, binding_added_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (binding_deleted_tx, binding_deleted_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (deleted_host_tx, deleted_host_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (spec_update_tx, spec_update_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, _) = watch::channel(false);

        let shared = Arc::new(InstanceShared {
            subnet_name: name,
            settings,
            paths,
            data: StdMutex::new(InstanceData {
                subnet,
                state: InstanceState::Stopped,
                lease_clients: HashMap::new(),
                manual_bindings: HashMap::new(),
                auto_bindings: HashMap::new(),
            }),
            config_lock: TokioMutex::new(()),
            client_added_tx,
            client_deleted_tx,
            status_tx,
        });

        Ok(Self {
            shared,
            api,
            launcher,
            renderer,
            provisioner: InterfaceProvisioner,
            binding_added_tx,
            binding_deleted_tx,
            deleted_host_tx,
            spec_update_tx,
            stop_tx,
            receivers: StdMutex::new(Some(Receivers {
                events: EventReceivers {
                    binding_added_rx,
                    binding_deleted_rx,
                    deleted_host_rx,
                    spec_update_rx,
                },
                status_rx,
            })),
            tasks: StdMutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.subnet_name
    }

    pub fn state(&self) -> InstanceState {
        self.shared.lock_data().state
    }

    /// Current subnet spec held by the instance.
    pub fn subnet(&self) -> Subnet {
        self.shared.lock_data().subnet.clone()
    }

    fn lock_receivers(&self) -> MutexGuard<'_, Option<Receivers>> {
        self.receivers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Brings the instance up: provisions the sub-interface, writes the
    /// config and binding files, seeds the lease table from any surviving
    /// lease file, spawns the daemon, and launches the event loop plus the
    /// status worker.
    pub async fn run(&self) -> Result<(), DhcpError> {
        let Some(receivers) = self.lock_receivers().take() else {
            return Err(DhcpError::DaemonSpawn(
                "instance has already been started".to_string(),
            ));
        };
        let shared = Arc::clone(&self.shared);
        shared.lock_data().state = InstanceState::Starting;
        info!(subnet = %shared.subnet_name, "starting dhcp server instance");

        let interface_spec = { shared.lock_data().subnet.spec.interface.clone() };
        // Stale sub-interfaces from a previous lifetime are removed first.
        self.provisioner.cleanup(&interface_spec.interface).await;
        self.provisioner.provision(&interface_spec).await?;

        fs::create_dir_all(shared.paths.lease_dir())?;
        if let Some(parent) = shared.paths.log_file.parent() {
            fs::create_dir_all(parent)?;
        }

        // The main config references the binding file, so it must exist
        // before the daemon reads its config.
        if !shared.paths.bindings_file.exists() {
            write_atomically(&shared.paths.bindings_file, "")?;
        }

        let subnet_snapshot = { shared.lock_data().subnet.clone() };
        self.renderer
            .write_config(&subnet_snapshot, &shared.subnet_name, &shared.paths)?;

        // The lease file survives restarts and remains the source of truth
        // for the client table.
        let ctx = shared.lease_context();
        let table = match fs::read_to_string(&shared.paths.lease_file) {
            Ok(content) => parse_lease_table(&content, &ctx),
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        let bind_enabled = shared.bind_dhcp_ip_enabled();
        let full = {
            let mut data = shared.lock_data();
            if bind_enabled {
                for (ip, client) in &table {
                    if !data.manual_bindings.contains_key(ip) {
                        data.auto_bindings.insert(ip.clone(), client.clone());
                    }
                }
            }
            data.lease_clients = table;
            full_binding_set(&data)
        };
        update_binding_file(&shared, full, HashMap::new()).await?;

        let mut daemon = self.launcher.spawn(&shared.paths.config_file).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        if !daemon.is_alive() {
            return Err(DhcpError::DaemonSpawn(format!(
                "daemon for subnet {} exited during startup",
                shared.subnet_name
            )));
        }
        shared.lock_data().state = InstanceState::Running;

        // Lease-file writes are bridged from the notify callback onto the
        // event loop.
        let (lease_tx, lease_rx) = mpsc::unbounded_channel();
        let subnet_name = shared.subnet_name.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let _ = lease_tx.send(event);
                }
                Err(err) => warn!(subnet = %subnet_name, %err, "lease watch error"),
            }
        })
        .map_err(|err| DhcpError::LeaseWatch(err.to_string()))?;
        watcher
            .watch(shared.paths.lease_dir(), notify::RecursiveMode::NonRecursive)
            .map_err(|err| DhcpError::LeaseWatch(err.to_string()))?;

        let monitor = Monitor {
            shared: Arc::clone(&self.shared),
            renderer: Arc::clone(&self.renderer),
            provisioner: self.provisioner,
            launcher: Arc::clone(&self.launcher),
            daemon,
            events: receivers.events,
            lease_rx,
            stop_rx: self.stop_tx.subscribe(),
            _watcher: Some(watcher),
        };
        {
            let mut tasks = self.lock_tasks();
            tasks.push(tokio::spawn(monitor.run()));
            tasks.push(tokio::spawn(run_status_worker(
                Arc::clone(&self.shared),
                self.api.clone(),
                receivers.status_rx,
                self.stop_tx.subscribe(),
            )));
        }

        self.shared.mark_dirty();
        info!(subnet = %self.shared.subnet_name, "dhcp server instance running");
        Ok(())
    }

    /// Stops the instance: signals the event loop, which terminates the
    /// daemon and releases the sub-interface, then waits for both workers.
    /// Never fails.
    pub async fn stop(&self) {
        info!(subnet = %self.shared.subnet_name, "stopping dhcp server instance");
        let _ = self.stop_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_tasks());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(subnet = %self.shared.subnet_name, %err, "instance task ended abnormally");
            }
        }
        self.shared.lock_data().state = InstanceState::Stopped;
    }

    /// Swaps in an updated subnet spec and queues a config regeneration
    /// plus reload.
    pub fn update_service(&self, subnet: Subnet) {
        self.shared.lock_data().subnet = subnet;
        if self.spec_update_tx.try_send(()).is_err() {
            warn!(subnet = %self.shared.subnet_name, "spec-update event dropped");
        }
    }

    /// Queues manual binding additions and removals.
    pub fn update_binding_ips(&self, added: Vec<BindingIpInfo>, deleted: Vec<BindingIpInfo>) {
        if !added.is_empty() && self.binding_added_tx.try_send(added).is_err() {
            warn!(subnet = %self.shared.subnet_name, "binding-add event dropped");
        }
        if !deleted.is_empty() && self.binding_deleted_tx.try_send(deleted).is_err() {
            warn!(subnet = %self.shared.subnet_name, "binding-delete event dropped");
        }
    }

    /// Queues removal of the automatic binding held by a departed host.
    /// Manual bindings are never touched by this path.
    pub fn delete_dhcp_binding(&self, client: DhcpClientInfo) {
        if self.deleted_host_tx.try_send(client).is_err() {
            warn!(subnet = %self.shared.subnet_name, "deleted-host event dropped");
        }
    }
}

/// The per-instance event loop.
struct Monitor {
    shared: Arc<InstanceShared>,
    renderer: Arc<ConfigRenderer>,
    provisioner: InterfaceProvisioner,
    launcher: Arc<dyn DaemonLauncher>,
    daemon: Box<dyn DaemonHandle>,
    events: EventReceivers,
    lease_rx: mpsc::UnboundedReceiver<notify::Event>,
    stop_rx: watch::Receiver<bool>,
    _watcher: Option<notify::RecommendedWatcher>,
}

impl Monitor {
    async fn run(mut self) {
        let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let mut need_renew_config = false;
            let mut need_reload = false;
            let mut need_restart = false;

            tokio::select! {
                _ = self.stop_rx.changed() => break,
                maybe = self.lease_rx.recv() => {
                    let Some(event) = maybe else { break };
                    if is_lease_write(&event, &self.shared.paths.lease_file) {
                        match self.process_lease_file().await {
                            Ok(rebound) => need_reload = rebound,
                            Err(err) => {
                                error!(subnet = %self.shared.subnet_name, %err, "failed to process lease update");
                            }
                        }
                    }
                }
                maybe = self.events.deleted_host_rx.recv() => {
                    let Some(client) = maybe else { break };
                    match self.remove_auto_binding(client).await {
                        Ok(changed) => need_reload = changed,
                        Err(err) => {
                            error!(subnet = %self.shared.subnet_name, %err, "failed to remove auto binding");
                        }
                    }
                }
                maybe = self.events.binding_added_rx.recv() => {
                    let Some(batch) = maybe else { break };
                    match self.apply_binding_adds(batch).await {
                        Ok(changed) => need_reload = changed,
                        Err(err) => {
                            error!(subnet = %self.shared.subnet_name, %err, "failed to apply binding additions");
                        }
                    }
                }
                maybe = self.events.binding_deleted_rx.recv() => {
                    let Some(batch) = maybe else { break };
                    match self.apply_binding_deletes(batch).await {
                        Ok(changed) => need_reload = changed,
                        Err(err) => {
                            error!(subnet = %self.shared.subnet_name, %err, "failed to apply binding removals");
                        }
                    }
                }
                maybe = self.events.spec_update_rx.recv() => {
                    let Some(()) = maybe else { break };
                    need_renew_config = true;
                    need_reload = true;
                }
                _ = liveness.tick() => {
                    if !self.daemon.is_alive() {
                        warn!(subnet = %self.shared.subnet_name, "daemon process died");
                        need_restart = true;
                    }
                }
            }

            if need_renew_config {
                if let Err(err) = self.regenerate_config().await {
                    error!(subnet = %self.shared.subnet_name, %err, "failed to regenerate config");
                    continue;
                }
            }

            if need_restart {
                self.restart().await;
            } else if need_reload {
                self.reload();
            }
            if need_restart || need_reload {
                self.shared.mark_dirty();
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        self.shared.lock_data().state = InstanceState::Stopped;
        if let Err(err) = self.daemon.kill().await {
            warn!(subnet = %self.shared.subnet_name, %err, "failed to terminate daemon");
        }
        let base = { self.shared.lock_data().subnet.spec.interface.interface.clone() };
        self.provisioner.cleanup(&base).await;
        info!(subnet = %self.shared.subnet_name, "dhcp server instance stopped");
    }

    /// Re-reads the lease file, diffs it against the previous table, pushes
    /// announcements and departures to the discovery channels, and folds
    /// rebound clients into the binding file when lease binding is enabled.
    ///
    /// Returns whether the binding file changed, i.e. whether the daemon
    /// needs a reload. A pure renewal returns false.
    async fn process_lease_file(&mut self) -> Result<bool, DhcpError> {
        let content = match fs::read_to_string(&self.shared.paths.lease_file) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        let ctx = self.shared.lease_context();
        let next = parse_lease_table(&content, &ctx);
        let bind_enabled = self.shared.bind_dhcp_ip_enabled();

        let (diff, rebind_added) = {
            let mut data = self.shared.lock_data();
            let diff = diff_lease_tables(&data.lease_clients, &next);
            data.lease_clients = next;

            let mut rebind_added = BTreeMap::new();
            if bind_enabled {
                for (ip, client) in &diff.rebind {
                    // Manual bindings win over lease-derived ones.
                    if data.manual_bindings.contains_key(ip) {
                        continue;
                    }
                    data.auto_bindings.insert(ip.clone(), client.clone());
                    rebind_added.insert(ip.clone(), client.clone());
                }
            }
            (diff, rebind_added)
        };

        for client in &diff.announced {
            if self.shared.client_added_tx.try_send(client.clone()).is_err() {
                debug!(ip = %client.ip, "discovery queue full, dropping client announcement");
            }
        }
        for client in &diff.departed {
            if self
                .shared
                .client_deleted_tx
                .try_send(client.clone())
                .is_err()
            {
                debug!(ip = %client.ip, "discovery queue full, dropping client departure");
            }
        }
        if !diff.announced.is_empty() || !diff.departed.is_empty() {
            self.shared.mark_dirty();
        }

        if rebind_added.is_empty() {
            return Ok(false);
        }
        update_binding_file(&self.shared, rebind_added, HashMap::new()).await?;
        Ok(true)
    }

    /// Removes the lease-derived binding of a departed host on an exact
    /// IP+MAC match. The full current set is re-applied in the same pass so
    /// a manual binding for the IP survives.
    async fn remove_auto_binding(&mut self, client: DhcpClientInfo) -> Result<bool, DhcpError> {
        let (full, removed) = {
            let mut data = self.shared.lock_data();
            let matches = data
                .auto_bindings
                .get(&client.ip)
                .is_some_and(|bound| bound.mac.eq_ignore_ascii_case(&client.mac));
            if matches {
                data.auto_bindings.remove(&client.ip);
            }
            (full_binding_set(&data), matches)
        };
        if !removed {
            debug!(ip = %client.ip, mac = %client.mac, "no matching auto binding to remove");
            return Ok(false);
        }
        info!(ip = %client.ip, mac = %client.mac, "removing auto binding for departed host");
        let deleted = HashMap::from([(client.ip.clone(), client)]);
        update_binding_file(&self.shared, full, deleted).await?;
        self.shared.mark_dirty();
        Ok(true)
    }

    async fn apply_binding_adds(&mut self, batch: Vec<BindingIpInfo>) -> Result<bool, DhcpError> {
        let full = {
            let mut data = self.shared.lock_data();
            let cidr = data.subnet.spec.ipv4_subnet.subnet.clone();
            let mut changed = false;
            for info in batch {
                if !info.valid {
                    continue;
                }
                let already_bound = data
                    .manual_bindings
                    .get(&info.ip_addr)
                    .is_some_and(|bound| bound.mac.eq_ignore_ascii_case(&info.mac_addr));
                if already_bound {
                    continue;
                }
                info!(ip = %info.ip_addr, mac = %info.mac_addr, "adding manual binding");
                let ip = info.ip_addr.clone();
                data.manual_bindings.insert(
                    ip.clone(),
                    DhcpClientInfo {
                        mac: info.mac_addr.clone(),
                        ip,
                        hostname: String::new(),
                        active: false,
                        dhcp_expire_time: None,
                        subnet: cidr.clone(),
                        subnet_name: self.shared.subnet_name.clone(),
                        cluster_name: None,
                    },
                );
                changed = true;
            }
            if !changed {
                return Ok(false);
            }
            full_binding_set(&data)
        };
        update_binding_file(&self.shared, full, HashMap::new()).await?;
        self.shared.mark_dirty();
        Ok(true)
    }

    async fn apply_binding_deletes(&mut self, batch: Vec<BindingIpInfo>) -> Result<bool, DhcpError> {
        let (full, deleted) = {
            let mut data = self.shared.lock_data();
            let mut deleted = HashMap::new();
            for info in batch {
                // Only an exact IP+MAC match removes a binding; a stale
                // delete must not drop an IP rebound to a different MAC.
                let matches = data
                    .manual_bindings
                    .get(&info.ip_addr)
                    .is_some_and(|bound| bound.mac.eq_ignore_ascii_case(&info.mac_addr));
                if !matches {
                    continue;
                }
                info!(ip = %info.ip_addr, mac = %info.mac_addr, "removing manual binding");
                if let Some(bound) = data.manual_bindings.remove(&info.ip_addr) {
                    deleted.insert(info.ip_addr.clone(), bound);
                }
            }
            if deleted.is_empty() {
                return Ok(false);
            }
            (full_binding_set(&data), deleted)
        };
        update_binding_file(&self.shared, full, deleted).await?;
        self.shared.mark_dirty();
        Ok(true)
    }

    async fn regenerate_config(&self) -> Result<(), DhcpError> {
        let subnet = { self.shared.lock_data().subnet.clone() };
        let _guard = self.shared.config_lock.lock().await;
        self.renderer
            .write_config(&subnet, &self.shared.subnet_name, &self.shared.paths)
    }

    async fn restart(&mut self) {
        self.shared.lock_data().state = InstanceState::Restarting;
        if let Err(err) = self.daemon.kill().await {
            warn!(subnet = %self.shared.subnet_name, %err, "failed to terminate dead daemon");
        }
        match self.launcher.spawn(&self.shared.paths.config_file).await {
            Ok(daemon) => {
                self.daemon = daemon;
                self.shared.lock_data().state = InstanceState::Running;
                info!(subnet = %self.shared.subnet_name, "daemon restarted");
            }
            Err(err) => {
                // The next liveness tick retries.
                error!(subnet = %self.shared.subnet_name, %err, "failed to restart daemon");
            }
        }
    }

    fn reload(&mut self) {
        self.shared.lock_data().state = InstanceState::Reloading;
        if let Err(err) = self.daemon.reload() {
            warn!(subnet = %self.shared.subnet_name, %err, "failed to reload daemon");
        }
        self.shared.lock_data().state = InstanceState::Running;
    }
}

/// Whether a filesystem event is a write to the instance's lease file.
fn is_lease_write(event: &notify::Event, lease_file: &Path) -> bool {
    matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
    ) && event.paths.iter().any(|p| p == lease_file)
}
