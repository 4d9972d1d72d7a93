//! Subnet fleet management.
//!
//! Maps Subnet resources 1:1 onto running [`DhcpServerInstance`]s: a
//! reconcile starts or reconfigures the instance for a subnet, a deletion
//! stops and evicts it. Only the leader acts; followers observe and stay
//! passive. A fan-out loop routes manual-binding events from the BindingIp
//! reconciler and deleted-host records from the discovery layer to the
//! owning instance, requeueing events whose subnet has no instance yet so
//! startup ordering races are tolerated instead of dropped.

use crate::cache::SubnetCache;
use crate::error::ControllerError;
use crate::registry::BindingRegistry;
use chrono::Utc;
use crds::{Subnet, SubnetCondition};
use dhcp_server::backoff::{is_conflict, ConflictBackoff};
use dhcp_server::{
    AgentSettings, BindingIpInfo, DaemonLauncher, DhcpClientInfo, DhcpError, DhcpServerInstance,
};
use kube::api::{ListParams, PostParams};
use kube::Api;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, error, info, warn};

/// Delay before a binding or host event targeting a subnet with no running
/// instance is retried, and before a failed instance start is retried.
const UNKNOWN_SUBNET_REQUEUE: Duration = Duration::from_secs(30);

/// Capacity of the internal failed-start retry queue.
const RETRY_QUEUE_CAPACITY: usize = 64;

/// Redelivers `event` on `tx` after `delay`.
fn requeue_after<T: Send + 'static>(tx: mpsc::Sender<T>, event: T, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if tx.send(event).await.is_err() {
            warn!("requeued event dropped, fleet loop stopped");
        }
    });
}

/// Whether this replica currently owns the fleet. Provided externally by
/// leader election; followers never create, destroy, or reconfigure
/// instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// A manual-binding change routed from the BindingIp reconciler.
#[derive(Debug, Clone)]
pub enum BindingEvent {
    Added(BindingIpInfo),
    Deleted(BindingIpInfo),
}

impl BindingEvent {
    fn info(&self) -> &BindingIpInfo {
        match self {
            BindingEvent::Added(info) | BindingEvent::Deleted(info) => info,
        }
    }
}

/// Validates a subnet spec before it reaches an instance: the base
/// interface name must be well formed, the range must lie inside the CIDR,
/// and against a previously seen spec the range may only ever expand.
fn validate_subnet_spec(previous: Option<&Subnet>, subnet: &Subnet) -> Result<(), DhcpError> {
    let spec = &subnet.spec;
    if !iprange::is_valid_interface_name(&spec.interface.interface) {
        return Err(DhcpError::InvalidSubnet(format!(
            "invalid interface name: {}",
            spec.interface.interface
        )));
    }
    iprange::validate_within_subnet(&spec.ipv4_subnet.ip_range, &spec.ipv4_subnet.subnet)?;
    if let Some(previous) = previous {
        iprange::validate_expansion(
            &previous.spec.ipv4_subnet.ip_range,
            &spec.ipv4_subnet.ip_range,
            &spec.ipv4_subnet.subnet,
        )?;
    }
    Ok(())
}

pub struct FleetManager {
    settings: Arc<AgentSettings>,
    api: Api<Subnet>,
    launcher: Arc<dyn DaemonLauncher>,
    registry: Arc<BindingRegistry>,
    cache: Arc<SubnetCache>,
    role: Mutex<Role>,
    instances: TokioMutex<HashMap<String, Arc<DhcpServerInstance>>>,
    /// Requeue handle for events whose subnet is not running yet
    binding_tx: mpsc::Sender<BindingEvent>,
    deleted_host_tx: mpsc::Sender<DhcpClientInfo>,
    /// Internal queue of subnet names whose instance start failed
    retry_tx: mpsc::Sender<String>,
    retry_rx: Mutex<Option<mpsc::Receiver<String>>>,
    /// Discovery channels handed to every instance
    client_added_tx: mpsc::Sender<DhcpClientInfo>,
    client_deleted_tx: mpsc::Sender<DhcpClientInfo>,
}

impl FleetManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<AgentSettings>,
        api: Api<Subnet>,
        launcher: Arc<dyn DaemonLauncher>,
        registry: Arc<BindingRegistry>,
        cache: Arc<SubnetCache>,
        binding_tx: mpsc::Sender<BindingEvent>,
        deleted_host_tx: mpsc::Sender<DhcpClientInfo>,
        client_added_tx: mpsc::Sender<DhcpClientInfo>,
        client_deleted_tx: mpsc::Sender<DhcpClientInfo>,
    ) -> Self {
        let (retry_tx, retry_rx) = mpsc::channel(RETRY_QUEUE_CAPACITY);
        Self {
            settings,
            api,
            launcher,
            registry,
            cache,
            role: Mutex::new(Role::Follower),
            instances: TokioMutex::new(HashMap::new()),
            binding_tx,
            deleted_host_tx,
            retry_tx,
            retry_rx: Mutex::new(Some(retry_rx)),
            client_added_tx,
            client_deleted_tx,
        }
    }

    fn lock_role(&self) -> MutexGuard<'_, Role> {
        self.role.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn role(&self) -> Role {
        *self.lock_role()
    }

    pub fn set_role(&self, role: Role) {
        info!(?role, "fleet role changed");
        *self.lock_role() = role;
    }

    /// Sender for deleted-host records from the discovery layer.
    pub fn deleted_host_sender(&self) -> mpsc::Sender<DhcpClientInfo> {
        self.deleted_host_tx.clone()
    }

    /// Lists all subnet resources and starts one instance per resource.
    /// Called once on election, before any queued cross-module events are
    /// processed, so that incoming events have a live instance to route to.
    pub async fn resync(&self) -> Result<(), ControllerError> {
        let subnets = self.api.list(&ListParams::default()).await?;
        info!(count = subnets.items.len(), "resyncing existing subnets");
        for subnet in subnets.items {
            if subnet.metadata.deletion_timestamp.is_some() {
                continue;
            }
            if let Err(err) = self.reconcile_subnet(subnet).await {
                // Leave the rest of the fleet running; the watch stream
                // retries this subnet.
                error!(%err, "failed to start subnet during resync");
            }
        }
        Ok(())
    }

    /// Starts, reconfigures, or skips the instance for `subnet`.
    pub async fn reconcile_subnet(&self, subnet: Subnet) -> Result<(), ControllerError> {
        if self.role() == Role::Follower {
            debug!("not the leader, ignoring subnet event");
            return Ok(());
        }
        let Some(name) = subnet.metadata.name.clone() else {
            warn!("subnet resource without a name, ignoring");
            return Ok(());
        };

        let mut instances = self.instances.lock().await;
        if instances.contains_key(&name) && !self.cache.has_spec_changed(&name, &subnet) {
            debug!(subnet = %name, "spec unchanged, skipping");
            return Ok(());
        }

        let previous = self.cache.get(&name);
        if let Err(err) = validate_subnet_spec(previous.as_ref(), &subnet) {
            error!(subnet = %name, %err, "rejecting invalid subnet spec");
            self.publish_failure(&name, "InvalidSpec", &err).await;
            return Err(err.into());
        }
        self.cache.update(&name, subnet.clone());

        if let Some(instance) = instances.get(&name) {
            info!(subnet = %name, "subnet spec changed, updating dhcp server");
            instance.update_service(subnet);
            return Ok(());
        }

        info!(subnet = %name, "starting dhcp server");
        let instance = Arc::new(DhcpServerInstance::new(
            Arc::clone(&self.settings),
            subnet,
            self.api.clone(),
            Arc::clone(&self.launcher),
            self.client_added_tx.clone(),
            self.client_deleted_tx.clone(),
        )?);
        if let Err(err) = instance.run().await {
            error!(subnet = %name, %err, "failed to start dhcp server, will retry");
            instance.stop().await;
            self.publish_failure(&name, "StartFailed", &err).await;
            // Start failures are frequently transient (base interface down,
            // daemon binary momentarily unavailable); retry from a fresh
            // copy of the resource.
            requeue_after(self.retry_tx.clone(), name, UNKNOWN_SUBNET_REQUEUE);
            return Err(err.into());
        }

        // Seed the new instance with the manual bindings already known
        // for its subnet.
        let bindings: Vec<BindingIpInfo> = self
            .registry
            .by_subnet(&name)
            .into_iter()
            .filter(|binding| binding.valid)
            .collect();
        if !bindings.is_empty() {
            instance.update_binding_ips(bindings, Vec::new());
        }

        instances.insert(name, instance);
        Ok(())
    }

    /// Stops and evicts the instance for a deleted subnet.
    pub async fn handle_subnet_deleted(&self, name: &str) {
        self.cache.remove(name);
        if self.role() == Role::Follower {
            return;
        }
        let instance = self.instances.lock().await.remove(name);
        if let Some(instance) = instance {
            info!(subnet = %name, "subnet deleted, stopping dhcp server");
            instance.stop().await;
        }
    }

    /// Stops every running instance. Used on shutdown.
    pub async fn shutdown(&self) {
        let instances: Vec<_> = self.instances.lock().await.drain().collect();
        for (name, instance) in instances {
            info!(subnet = %name, "stopping dhcp server");
            instance.stop().await;
        }
    }

    /// Fan-out loop: routes binding events and deleted-host records to the
    /// owning instances, and drains the discovery channels.
    pub async fn run(
        self: Arc<Self>,
        mut binding_rx: mpsc::Receiver<BindingEvent>,
        mut deleted_host_rx: mpsc::Receiver<DhcpClientInfo>,
        mut client_added_rx: mpsc::Receiver<DhcpClientInfo>,
        mut client_deleted_rx: mpsc::Receiver<DhcpClientInfo>,
    ) {
        let retry_rx = self
            .retry_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut retry_rx) = retry_rx else {
            error!("fleet event loop started twice");
            return;
        };
        loop {
            tokio::select! {
                maybe = binding_rx.recv() => {
                    let Some(event) = maybe else { break };
                    self.dispatch_binding_event(event).await;
                }
                maybe = deleted_host_rx.recv() => {
                    let Some(client) = maybe else { break };
                    self.dispatch_deleted_host(client).await;
                }
                maybe = retry_rx.recv() => {
                    let Some(name) = maybe else { break };
                    self.retry_subnet(&name).await;
                }
                maybe = client_added_rx.recv() => {
                    let Some(client) = maybe else { break };
                    debug!(subnet = %client.subnet_name, ip = %client.ip, mac = %client.mac,
                           active = client.active, "dhcp client observed");
                }
                maybe = client_deleted_rx.recv() => {
                    let Some(client) = maybe else { break };
                    debug!(subnet = %client.subnet_name, ip = %client.ip, "dhcp client departed");
                }
            }
        }
        debug!("fleet event loop ended");
    }

    async fn dispatch_binding_event(self: &Arc<Self>, event: BindingEvent) {
        let subnet = event.info().subnet.clone();
        let instances = self.instances.lock().await;
        let Some(instance) = instances.get(&subnet) else {
            drop(instances);
            if matches!(event, BindingEvent::Deleted(_)) {
                debug!(subnet = %subnet, "no running server for binding removal, dropping");
                return;
            }
            debug!(subnet = %subnet, "subnet not running yet, requeueing binding event");
            requeue_after(self.binding_tx.clone(), event, UNKNOWN_SUBNET_REQUEUE);
            return;
        };
        match event {
            BindingEvent::Added(info) => instance.update_binding_ips(vec![info], Vec::new()),
            BindingEvent::Deleted(info) => instance.update_binding_ips(Vec::new(), vec![info]),
        }
    }

    async fn dispatch_deleted_host(self: &Arc<Self>, client: DhcpClientInfo) {
        let instances = self.instances.lock().await;
        let Some(instance) = instances.get(&client.subnet_name) else {
            drop(instances);
            debug!(subnet = %client.subnet_name, ip = %client.ip,
                   "subnet not running yet, requeueing deleted-host event");
            requeue_after(self.deleted_host_tx.clone(), client, UNKNOWN_SUBNET_REQUEUE);
            return;
        };
        instance.delete_dhcp_binding(client);
    }

    /// Retries a subnet whose instance start failed, from a fresh copy of
    /// the resource so spec changes made in the meantime are picked up.
    async fn retry_subnet(&self, name: &str) {
        let subnet = match self.api.get(name).await {
            Ok(subnet) => subnet,
            Err(err) => {
                warn!(subnet = %name, %err, "failed to refetch subnet for retry");
                return;
            }
        };
        if subnet.metadata.deletion_timestamp.is_some() {
            return;
        }
        info!(subnet = %name, "retrying dhcp server start");
        if let Err(err) = self.reconcile_subnet(subnet).await {
            error!(subnet = %name, %err, "retried dhcp server start failed");
        }
    }

    /// Records a failure condition on the subnet status, retrying
    /// conflicts.
    async fn publish_failure(&self, name: &str, reason: &str, cause: &DhcpError) {
        let mut backoff = ConflictBackoff::for_status_updates();
        loop {
            match self.try_publish_failure(name, reason, cause).await {
                Ok(()) => return,
                Err(err) if is_conflict(&err) => match backoff.next_delay() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        warn!(subnet = %name, %err, "giving up on failure status write");
                        return;
                    }
                },
                Err(err) => {
                    warn!(subnet = %name, %err, "failed to publish failure condition");
                    return;
                }
            }
        }
    }

    async fn try_publish_failure(
        &self,
        name: &str,
        reason: &str,
        cause: &DhcpError,
    ) -> Result<(), kube::Error> {
        let mut subnet = self.api.get(name).await?;
        let mut status = subnet.status.take().unwrap_or_default();
        status.host_node = Some(self.settings.node_name.clone());
        status.conditions.push(SubnetCondition {
            r#type: "DhcpServer".to_string(),
            status: "False".to_string(),
            reason: reason.to_string(),
            message: cause.to_string(),
            last_transition_time: Utc::now().to_rfc3339(),
        });
        subnet.status = Some(status);

        let payload = match serde_json::to_vec(&subnet) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(subnet = %name, %err, "failed to serialize status payload");
                return Ok(());
            }
        };
        self.api
            .replace_status(name, &PostParams::default(), payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{InterfaceSpec, Ipv4SubnetSpec, SubnetSpec};
    use kube::core::ObjectMeta;

    fn subnet(interface: &str, range: &str) -> Subnet {
        Subnet {
            metadata: ObjectMeta {
                name: Some("sub1".to_string()),
                ..Default::default()
            },
            spec: SubnetSpec {
                ipv4_subnet: Ipv4SubnetSpec {
                    subnet: "10.0.0.0/24".to_string(),
                    ip_range: range.to_string(),
                    gateway: None,
                    dns: None,
                },
                interface: InterfaceSpec {
                    interface: interface.to_string(),
                    vlan_id: None,
                    ipv4: "10.0.0.2/24".to_string(),
                },
                feature: None,
            },
            status: None,
        }
    }

    #[test]
    fn accepts_fresh_valid_spec() {
        let s = subnet("eth0", "10.0.0.10-10.0.0.50");
        assert!(validate_subnet_spec(None, &s).is_ok());
    }

    #[test]
    fn rejects_bad_interface_name() {
        let s = subnet("eth0@bad", "10.0.0.10-10.0.0.50");
        assert!(matches!(
            validate_subnet_spec(None, &s),
            Err(DhcpError::InvalidSubnet(_))
        ));
    }

    #[test]
    fn rejects_range_outside_cidr() {
        let s = subnet("eth0", "10.1.0.10-10.1.0.50");
        assert!(validate_subnet_spec(None, &s).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_event_redelivers_after_the_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let info = BindingIpInfo {
            subnet: "sub1".to_string(),
            ip_addr: "10.0.0.20".to_string(),
            mac_addr: "aa:bb:cc:dd:ee:ff".to_string(),
            valid: true,
        };
        requeue_after(tx, BindingEvent::Added(info), UNKNOWN_SUBNET_REQUEUE);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(
            rx.try_recv().is_err(),
            "event must not arrive before the delay"
        );

        let event = rx.recv().await.expect("event redelivered");
        assert!(matches!(event, BindingEvent::Added(i) if i.subnet == "sub1"));
    }

    #[test]
    fn range_may_expand_but_never_shrink() {
        let old = subnet("eth0", "10.0.0.10-10.0.0.50");
        let wider = subnet("eth0", "10.0.0.5-10.0.0.60");
        assert!(validate_subnet_spec(Some(&old), &wider).is_ok());

        let narrower = subnet("eth0", "10.0.0.20-10.0.0.50");
        assert!(validate_subnet_spec(Some(&old), &narrower).is_err());
    }
}
