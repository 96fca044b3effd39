//! The node actor: owner of capacity, instances, and bindings.
//!
//! Every handler is transactional. The backend is called first; local state
//! and capacity only change once it has succeeded, and any fault turns into
//! a `Service unavailable` reply with nothing mutated.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use svcb_bus::{Message, Transport};
use svcb_capacity::{Capacity, CapacityDelta};
use svcb_id::{BindingId, CorrelationId, InstanceId, NodeId};
use svcb_proto::{
    decode, encode, Announcement, BindRequest, CheckOrphanRequest, ImportRequest,
    InstanceRequest, Operation, OperationKind, OrphanReport, ProvisionRequest, PurgeOrphanRequest,
    PurgeReport, ReplyBody, ReplyEnvelope, ReplyError, RequestEnvelope, RestoreRequest, Subjects,
    UnbindRequest, UpdateRequest,
};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use super::framework::{Actor, ActorError, Flow};
use crate::backend::ServiceBackend;
use crate::config::NodeConfig;

/// Messages the node actor handles.
#[derive(Debug)]
pub enum NodeMessage {
    /// A request delivered by one of the node's subscriptions.
    Request(Message),

    /// Publish an unsolicited announcement if ready.
    Announce,

    /// Flip the ready flag.
    SetReady(bool),

    /// Read the current state.
    Snapshot(oneshot::Sender<NodeSnapshot>),

    /// Read the current state on behalf of the varz probe.
    Varz(oneshot::Sender<NodeSnapshot>),
}

/// How many times each handler has been invoked, successful or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandlerCounters {
    pub provision: u64,
    pub unprovision: u64,
    pub bind: u64,
    pub unbind: u64,
    pub restore: u64,
    pub disable: u64,
    pub enable: u64,
    pub import: u64,
    pub update: u64,
    pub cleanupnfs: u64,
    pub varz: u64,
}

impl HandlerCounters {
    fn record(&mut self, kind: OperationKind) {
        match kind {
            OperationKind::Provision => self.provision += 1,
            OperationKind::Unprovision => self.unprovision += 1,
            OperationKind::Bind => self.bind += 1,
            OperationKind::Unbind => self.unbind += 1,
            OperationKind::Restore => self.restore += 1,
            OperationKind::Disable => self.disable += 1,
            OperationKind::Enable => self.enable += 1,
            OperationKind::Import => self.import += 1,
            OperationKind::Update => self.update += 1,
            OperationKind::CleanupNfs => self.cleanupnfs += 1,
            OperationKind::Discover | OperationKind::CheckOrphan | OperationKind::PurgeOrphan => {}
        }
    }

    /// Invocations of the handler for `kind`.
    pub fn get(&self, kind: OperationKind) -> u64 {
        match kind {
            OperationKind::Provision => self.provision,
            OperationKind::Unprovision => self.unprovision,
            OperationKind::Bind => self.bind,
            OperationKind::Unbind => self.unbind,
            OperationKind::Restore => self.restore,
            OperationKind::Disable => self.disable,
            OperationKind::Enable => self.enable,
            OperationKind::Import => self.import,
            OperationKind::Update => self.update,
            OperationKind::CleanupNfs => self.cleanupnfs,
            OperationKind::Discover | OperationKind::CheckOrphan | OperationKind::PurgeOrphan => 0,
        }
    }
}

/// Point-in-time view of a node, served by `/varz`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub plan: String,
    pub capacity: u32,
    pub ready: bool,
    pub instance_count: usize,
    pub disabled_count: usize,
    pub binding_count: usize,
    pub counters: HandlerCounters,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct InstanceRecord {
    disabled: bool,
}

#[derive(Debug, Clone)]
struct BindingRecord {
    instance_id: InstanceId,
}

type HandlerResult = Result<ReplyBody, ReplyError>;

/// The node actor.
pub struct NodeActor {
    node_id: NodeId,
    plan: String,
    capacity: Capacity,
    ready: bool,
    instances: BTreeMap<InstanceId, InstanceRecord>,
    bindings: BTreeMap<BindingId, BindingRecord>,
    counters: HandlerCounters,
    started_at: DateTime<Utc>,
    subjects: Subjects,
    transport: Arc<dyn Transport>,
    backend: Arc<dyn ServiceBackend>,
}

impl NodeActor {
    pub fn new(
        config: &NodeConfig,
        transport: Arc<dyn Transport>,
        backend: Arc<dyn ServiceBackend>,
    ) -> Self {
        let mut actor = Self {
            node_id: config.node_id,
            plan: config.plan.clone(),
            capacity: Capacity::new(config.capacity),
            ready: config.ready,
            instances: BTreeMap::new(),
            bindings: BTreeMap::new(),
            counters: HandlerCounters::default(),
            started_at: Utc::now(),
            subjects: Subjects::new(config.service.clone()),
            transport,
            backend,
        };
        actor.seed(config.seed_instances, config.seed_bindings);
        actor
    }

    /// Load pre-existing instances and bindings without touching capacity.
    ///
    /// Bindings are spread round-robin across the seeded instances; with no
    /// seeded instances they point at instances this node does not hold.
    fn seed(&mut self, instances: usize, bindings: usize) {
        let seeded: Vec<InstanceId> = (0..instances).map(|_| InstanceId::new()).collect();
        for id in &seeded {
            self.instances.insert(*id, InstanceRecord::default());
        }
        for i in 0..bindings {
            let instance_id = if seeded.is_empty() {
                InstanceId::new()
            } else {
                seeded[i % seeded.len()]
            };
            self.bindings
                .insert(BindingId::new(), BindingRecord { instance_id });
        }
        if instances > 0 || bindings > 0 {
            info!(
                node_id = %self.node_id,
                instances,
                bindings,
                "Seeded local inventory"
            );
        }
    }

    /// Announce for `plan`, or stay silent.
    pub fn try_announce(&self, plan: &str) -> Option<Announcement> {
        (self.ready && plan == self.plan).then(|| self.announcement())
    }

    fn announcement(&self) -> Announcement {
        Announcement {
            node_id: self.node_id,
            plan: self.plan.clone(),
            capacity: self.capacity.get(),
        }
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            node_id: self.node_id,
            plan: self.plan.clone(),
            capacity: self.capacity.get(),
            ready: self.ready,
            instance_count: self.instances.len(),
            disabled_count: self.instances.values().filter(|r| r.disabled).count(),
            binding_count: self.bindings.len(),
            counters: self.counters,
            started_at: self.started_at,
        }
    }

    fn fault(&self, kind: OperationKind, detail: impl std::fmt::Display) -> ReplyError {
        warn!(
            node_id = %self.node_id,
            op = %kind,
            error = %detail,
            "Operation failed"
        );
        ReplyError::service_unavailable(format!("{kind} failed: {detail}"))
    }

    fn require_instance(&self, kind: OperationKind, instance_id: InstanceId) -> Result<(), ReplyError> {
        if self.instances.contains_key(&instance_id) {
            Ok(())
        } else {
            Err(self.fault(kind, format_args!("unknown instance {instance_id}")))
        }
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    async fn on_request(&mut self, msg: Message) {
        let envelope: RequestEnvelope = match decode(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "Dropping undecodable request");
                return;
            }
        };

        let correlation_id = envelope.correlation_id;
        let Some(outcome) = self.dispatch(envelope.op).await else {
            return;
        };

        let Some(reply_to) = msg.reply_to else {
            debug!(correlation_id = %correlation_id, "Request expects no reply");
            return;
        };

        self.reply(&reply_to, correlation_id, outcome).await;
    }

    /// Run one operation. `None` means stay silent.
    async fn dispatch(&mut self, op: Operation) -> Option<HandlerResult> {
        let kind = op.kind();
        self.counters.record(kind);

        let outcome = match op {
            Operation::Discover(req) => {
                return self.try_announce(&req.plan).map(|a| Ok(ReplyBody::Announcement(a)));
            }
            Operation::CheckOrphan(req) => return self.check_orphan(&req).map(Ok),
            Operation::Provision(req) => self.provision(req).await,
            Operation::Unprovision(req) => self.unprovision(req).await,
            Operation::Bind(req) => self.bind(req).await,
            Operation::Unbind(req) => self.unbind(req).await,
            Operation::Restore(req) => self.restore(req).await,
            Operation::Disable(req) => self.set_disabled(kind, req, true).await,
            Operation::Enable(req) => self.set_disabled(kind, req, false).await,
            Operation::Import(req) => self.import(req).await,
            Operation::Update(req) => self.update(req).await,
            Operation::CleanupNfs(req) => Ok(self.cleanup_nfs(req).await),
            Operation::PurgeOrphan(req) => Ok(self.purge_orphan(req).await),
        };
        Some(outcome)
    }

    async fn reply(&self, reply_to: &str, correlation_id: CorrelationId, outcome: HandlerResult) {
        let capacity = self.capacity.get();
        let envelope = match outcome {
            Ok(body) => ReplyEnvelope::ok(correlation_id, self.node_id, capacity, body),
            Err(error) => ReplyEnvelope::fault(correlation_id, self.node_id, capacity, error),
        };

        let payload = match encode(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "Failed to encode reply");
                return;
            }
        };

        if let Err(e) = self.transport.publish(reply_to, payload, None).await {
            warn!(correlation_id = %correlation_id, error = %e, "Failed to publish reply");
        }
    }

    async fn publish_announcement(&self) {
        if !self.ready {
            return;
        }
        let subject = self.subjects.announce();
        match encode(&self.announcement()) {
            Ok(payload) => {
                if let Err(e) = self.transport.publish(&subject, payload, None).await {
                    warn!(node_id = %self.node_id, error = %e, "Failed to announce");
                }
            }
            Err(e) => warn!(node_id = %self.node_id, error = %e, "Failed to encode announcement"),
        }
    }

    // -------------------------------------------------------------------------
    // Handlers
    // -------------------------------------------------------------------------

    #[instrument(skip(self, req), fields(node_id = %self.node_id))]
    async fn provision(&mut self, req: ProvisionRequest) -> HandlerResult {
        let kind = OperationKind::Provision;
        if req.plan != self.plan {
            return Err(self.fault(kind, format_args!("plan {} not served here", req.plan)));
        }
        if !self.capacity.is_available() {
            return Err(self.fault(kind, "capacity exhausted"));
        }

        let instance_id = InstanceId::new();
        let credentials = self
            .backend
            .provision(instance_id, &self.plan, &req.params)
            .await
            .map_err(|e| self.fault(kind, e))?;

        self.capacity
            .apply(CapacityDelta::for_op(kind))
            .map_err(|e| self.fault(kind, e))?;
        self.instances.insert(instance_id, InstanceRecord::default());

        info!(instance_id = %instance_id, capacity = %self.capacity, "Provisioned instance");
        Ok(ReplyBody::Provisioned(credentials))
    }

    #[instrument(skip(self, req), fields(node_id = %self.node_id, instance_id = %req.instance_id))]
    async fn unprovision(&mut self, req: InstanceRequest) -> HandlerResult {
        let kind = OperationKind::Unprovision;
        self.require_instance(kind, req.instance_id)?;

        self.backend
            .unprovision(req.instance_id)
            .await
            .map_err(|e| self.fault(kind, e))?;

        let removed_bindings = self.remove_instance(req.instance_id);
        info!(
            removed_bindings = removed_bindings.len(),
            capacity = %self.capacity,
            "Unprovisioned instance"
        );
        Ok(ReplyBody::Unprovisioned {
            instance_id: req.instance_id,
            removed_bindings,
        })
    }

    /// Drop an instance, its bindings, and give its slot back.
    fn remove_instance(&mut self, instance_id: InstanceId) -> Vec<BindingId> {
        self.instances.remove(&instance_id);
        let removed: Vec<BindingId> = self
            .bindings
            .iter()
            .filter(|(_, b)| b.instance_id == instance_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &removed {
            self.bindings.remove(id);
        }
        self.capacity.release();
        removed
    }

    #[instrument(skip(self, req), fields(node_id = %self.node_id, instance_id = %req.instance_id))]
    async fn bind(&mut self, req: BindRequest) -> HandlerResult {
        let kind = OperationKind::Bind;
        self.require_instance(kind, req.instance_id)?;

        let binding_id = BindingId::new();
        let credentials = self
            .backend
            .bind(req.instance_id, binding_id, &req.params)
            .await
            .map_err(|e| self.fault(kind, e))?;

        self.bindings.insert(
            binding_id,
            BindingRecord {
                instance_id: req.instance_id,
            },
        );
        debug!(binding_id = %binding_id, "Bound instance");
        Ok(ReplyBody::Bound(credentials))
    }

    #[instrument(skip(self, req), fields(node_id = %self.node_id, binding_id = %req.binding_id))]
    async fn unbind(&mut self, req: UnbindRequest) -> HandlerResult {
        let kind = OperationKind::Unbind;
        if !self.bindings.contains_key(&req.binding_id) {
            return Err(self.fault(kind, format_args!("unknown binding {}", req.binding_id)));
        }

        self.backend
            .unbind(req.binding_id)
            .await
            .map_err(|e| self.fault(kind, e))?;

        self.bindings.remove(&req.binding_id);
        debug!("Unbound");
        Ok(ReplyBody::Unbound {
            binding_id: req.binding_id,
        })
    }

    async fn restore(&mut self, req: RestoreRequest) -> HandlerResult {
        let kind = OperationKind::Restore;
        self.require_instance(kind, req.instance_id)?;
        self.backend
            .restore(req.instance_id, &req.backup_path)
            .await
            .map_err(|e| self.fault(kind, e))?;
        Ok(ReplyBody::Done {
            instance_id: req.instance_id,
        })
    }

    async fn set_disabled(
        &mut self,
        kind: OperationKind,
        req: InstanceRequest,
        disabled: bool,
    ) -> HandlerResult {
        self.require_instance(kind, req.instance_id)?;
        let result = if disabled {
            self.backend.disable(req.instance_id).await
        } else {
            self.backend.enable(req.instance_id).await
        };
        result.map_err(|e| self.fault(kind, e))?;

        if let Some(record) = self.instances.get_mut(&req.instance_id) {
            record.disabled = disabled;
        }
        Ok(ReplyBody::Done {
            instance_id: req.instance_id,
        })
    }

    async fn import(&mut self, req: ImportRequest) -> HandlerResult {
        let kind = OperationKind::Import;
        self.require_instance(kind, req.instance_id)?;
        self.backend
            .import(req.instance_id, &req.data)
            .await
            .map_err(|e| self.fault(kind, e))?;
        Ok(ReplyBody::Done {
            instance_id: req.instance_id,
        })
    }

    /// In-place migration. Consumes a slot that unprovision does not return.
    #[instrument(skip(self, req), fields(node_id = %self.node_id, instance_id = %req.instance_id))]
    async fn update(&mut self, req: UpdateRequest) -> HandlerResult {
        let kind = OperationKind::Update;
        self.require_instance(kind, req.instance_id)?;
        if !self.capacity.is_available() {
            return Err(self.fault(kind, "capacity exhausted"));
        }

        let credentials = self
            .backend
            .update(req.instance_id, &req.params)
            .await
            .map_err(|e| self.fault(kind, e))?;

        self.capacity
            .apply(CapacityDelta::for_op(kind))
            .map_err(|e| self.fault(kind, e))?;

        info!(capacity = %self.capacity, "Updated instance");
        Ok(ReplyBody::Updated(credentials))
    }

    /// Best effort; always answers, the body says whether anything was cleaned.
    async fn cleanup_nfs(&mut self, req: InstanceRequest) -> ReplyBody {
        let cleaned = match self.backend.cleanup_nfs(req.instance_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(instance_id = %req.instance_id, error = %e, "NFS cleanup failed");
                false
            }
        };
        ReplyBody::CleanupNfs {
            instance_id: req.instance_id,
            cleaned,
        }
    }

    fn check_orphan(&self, req: &CheckOrphanRequest) -> Option<ReplyBody> {
        if !req.addresses(&self.node_id) {
            return None;
        }
        debug!(
            node_id = %self.node_id,
            instances = self.instances.len(),
            bindings = self.bindings.len(),
            "Reporting inventory for orphan check"
        );
        Some(ReplyBody::Orphans(OrphanReport {
            instance_ids: self.instances.keys().copied().collect(),
            binding_ids: self.bindings.keys().copied().collect(),
        }))
    }

    /// Remove exactly the listed ids this node owns.
    ///
    /// Bindings go first so a purged instance's purged bindings count as
    /// unbinds rather than disappearing with the instance.
    #[instrument(skip(self, req), fields(node_id = %self.node_id))]
    async fn purge_orphan(&mut self, req: PurgeOrphanRequest) -> ReplyBody {
        let mut report = PurgeReport::default();

        for binding_id in req.binding_ids {
            if !self.bindings.contains_key(&binding_id) {
                continue;
            }
            self.counters.record(OperationKind::Unbind);
            match self.backend.unbind(binding_id).await {
                Ok(()) => {
                    self.bindings.remove(&binding_id);
                    report.purged_bindings.push(binding_id);
                }
                Err(e) => warn!(binding_id = %binding_id, error = %e, "Failed to purge binding"),
            }
        }

        for instance_id in req.instance_ids {
            if !self.instances.contains_key(&instance_id) {
                continue;
            }
            self.counters.record(OperationKind::Unprovision);
            match self.backend.unprovision(instance_id).await {
                Ok(()) => {
                    let cascaded = self.remove_instance(instance_id);
                    report.cascaded_bindings.extend(cascaded);
                    report.purged_instances.push(instance_id);
                }
                Err(e) => warn!(instance_id = %instance_id, error = %e, "Failed to purge instance"),
            }
        }

        info!(
            unprovisioned = report.unprovision_count(),
            unbound = report.unbind_count(),
            capacity = %self.capacity,
            "Purged orphans"
        );
        ReplyBody::Purged(report)
    }
}

#[async_trait]
impl Actor for NodeActor {
    type Message = NodeMessage;

    fn name(&self) -> &'static str {
        "node"
    }

    async fn started(&mut self) -> Result<(), ActorError> {
        info!(
            node_id = %self.node_id,
            plan = %self.plan,
            capacity = %self.capacity,
            ready = self.ready,
            "Node started"
        );
        Ok(())
    }

    async fn handle(&mut self, msg: NodeMessage) -> Result<Flow, ActorError> {
        match msg {
            NodeMessage::Request(msg) => self.on_request(msg).await,
            NodeMessage::Announce => self.publish_announcement().await,
            NodeMessage::SetReady(ready) => {
                info!(node_id = %self.node_id, ready, "Ready flag changed");
                self.ready = ready;
            }
            NodeMessage::Snapshot(tx) => {
                let _ = tx.send(self.snapshot());
            }
            NodeMessage::Varz(tx) => {
                self.counters.varz += 1;
                let _ = tx.send(self.snapshot());
            }
        }
        Ok(Flow::Continue)
    }
}
