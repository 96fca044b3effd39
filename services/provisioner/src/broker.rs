//! The provisioner.
//!
//! Client operations go through three steps. Routing picks a node from the
//! cache (or from the handle table for instance-scoped calls), the request
//! is published to that node's subject with the provisioner's private inbox
//! as reply subject, and the caller waits on the pending table until the
//! dispatcher hands it the correlated reply or the request timeout fires.
//!
//! Discovery and orphan checks are broadcasts with a fixed aggregation
//! window instead: zero or more nodes answer and each answer is merged on
//! its own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use svcb_bus::Transport;
use svcb_capacity::{Inventory, OrphanSet};
use svcb_id::{BindingId, InstanceId, NodeId};
use svcb_proto::{
    decode, encode, Announcement, BindRequest, CheckOrphanRequest, Credentials, DiscoverRequest,
    ImportRequest, InstanceRequest, Operation, OperationKind, ProvisionRequest,
    PurgeOrphanRequest, PurgeReport, ReplyBody, ReplyEnvelope, RequestEnvelope, RestoreRequest,
    Subjects, UnbindRequest, UpdateRequest,
};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::cache::{NodeCache, NodeRecord, NodeView};
use crate::config::ProvisionerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::handles::HandleTable;
use crate::pending::PendingRequests;
use crate::workers;

/// Which orphans a purge should remove.
#[derive(Debug, Clone)]
pub enum PurgeSelection {
    /// Everything the last orphan check staged.
    Staged,
    /// Exactly these ids, per node.
    Explicit(BTreeMap<NodeId, OrphanSet>),
}

/// Outcome of one orphan check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanCheck {
    /// Nodes that answered inside the window.
    pub responded: Vec<NodeId>,
    /// Orphans staged after merging the answers.
    pub orphans: BTreeMap<NodeId, OrphanSet>,
}

/// Outcome of one purge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeSummary {
    pub reports: BTreeMap<NodeId, PurgeReport>,
    /// Nodes that faulted or never answered.
    pub failed: Vec<NodeId>,
}

impl PurgeSummary {
    pub fn unprovision_count(&self) -> usize {
        self.reports.values().map(PurgeReport::unprovision_count).sum()
    }

    pub fn unbind_count(&self) -> usize {
        self.reports.values().map(PurgeReport::unbind_count).sum()
    }
}

/// Snapshot served by `/varz`.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionerVarz {
    pub service: String,
    pub nodes: Vec<NodeView>,
    pub pending_requests: usize,
    pub instance_handles: usize,
    pub binding_handles: usize,
    pub reported_instances: usize,
    pub reported_bindings: usize,
    pub orphan_instances: usize,
    pub orphan_bindings: usize,
}

/// Shared by the provisioner and its background workers.
pub(crate) struct Shared {
    pub(crate) cache: RwLock<NodeCache>,
    pub(crate) pending: PendingRequests,
}

struct Inner {
    config: ProvisionerConfig,
    subjects: Subjects,
    transport: Arc<dyn Transport>,
    inbox: String,
    shared: Arc<Shared>,
    handles: RwLock<HandleTable>,
    inventory: RwLock<Inventory>,
    staged: RwLock<BTreeMap<NodeId, OrphanSet>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running provisioner. Cheap to clone.
#[derive(Clone)]
pub struct Provisioner {
    inner: Arc<Inner>,
}

impl Provisioner {
    /// Subscribe the reply inbox and the announcement subject, then start
    /// the background workers.
    pub async fn start(
        config: ProvisionerConfig,
        transport: Arc<dyn Transport>,
    ) -> BrokerResult<Self> {
        let subjects = Subjects::new(config.service.clone());
        let inbox = transport.new_inbox();

        let replies = transport.subscribe(&inbox).await?;
        let announcements = transport.subscribe(&subjects.announce()).await?;

        let shared = Arc::new(Shared {
            cache: RwLock::new(NodeCache::new()),
            pending: PendingRequests::new(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(workers::run_reply_dispatcher(
                replies,
                shared.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(workers::run_announcement_listener(
                announcements,
                shared.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(workers::run_prune_loop(
                shared.clone(),
                config.prune_interval,
                config.node_timeout,
                shutdown_rx,
            )),
        ];

        info!(service = %subjects.service(), inbox = %inbox, "Provisioner started");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                subjects,
                transport,
                inbox,
                shared,
                handles: RwLock::new(HandleTable::new()),
                inventory: RwLock::new(Inventory::new()),
                staged: RwLock::new(BTreeMap::new()),
                shutdown_tx,
                tasks: Mutex::new(tasks),
            }),
        })
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.inner.config
    }

    /// Stop the background workers. Calls in flight finish or time out.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Provisioner task panicked");
            }
        }
        info!("Provisioner stopped");
    }

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------

    /// Broadcast a discovery for `plan` and merge every announcement that
    /// arrives inside the discovery window.
    #[instrument(skip(self))]
    pub async fn discover(&self, plan: &str) -> BrokerResult<Vec<Announcement>> {
        let envelope = RequestEnvelope::new(Operation::Discover(DiscoverRequest {
            plan: plan.to_string(),
        }));
        let mut replies = self
            .inner
            .transport
            .request(
                &self.inner.subjects.discover(),
                encode(&envelope)?,
                self.inner.config.discover_window,
            )
            .await?;

        let mut announcements = Vec::new();
        while let Some(raw) = replies.next().await {
            let announcement = match decode_reply(&raw) {
                Some(Ok(ReplyBody::Announcement(a))) if a.plan == plan => a,
                Some(Ok(body)) => {
                    debug!(?body, "Ignoring unexpected discovery reply");
                    continue;
                }
                Some(Err(_)) | None => continue,
            };
            self.inner
                .shared
                .cache
                .write()
                .await
                .merge_announcement(&announcement, Instant::now());
            announcements.push(announcement);
        }

        debug!(replies = announcements.len(), "Discovery window closed");
        Ok(announcements)
    }

    /// Drop every node that has been silent too long.
    pub async fn prune_stale(&self) -> Vec<NodeId> {
        self.inner
            .shared
            .cache
            .write()
            .await
            .prune_stale(Instant::now(), self.inner.config.node_timeout)
    }

    pub async fn node(&self, node_id: &NodeId) -> Option<NodeRecord> {
        self.inner.shared.cache.read().await.get(node_id).cloned()
    }

    pub async fn nodes(&self) -> Vec<NodeRecord> {
        self.inner
            .shared
            .cache
            .read()
            .await
            .records()
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Routing and forwarding
    // -------------------------------------------------------------------------

    async fn route(&self, plan: &str) -> BrokerResult<NodeId> {
        self.inner
            .shared
            .cache
            .read()
            .await
            .select(plan, Instant::now(), self.inner.config.node_timeout)
            .ok_or_else(|| {
                warn!(plan, "No eligible node");
                BrokerError::NoCapacity {
                    plan: plan.to_string(),
                }
            })
    }

    async fn instance_owner(&self, instance_id: InstanceId) -> BrokerResult<NodeId> {
        if let Some(node_id) = self.inner.handles.read().await.instance_node(&instance_id) {
            return Ok(node_id);
        }
        self.inner
            .inventory
            .read()
            .await
            .owner_of_instance(&instance_id)
            .ok_or(BrokerError::UnknownInstance(instance_id))
    }

    async fn binding_owner(&self, binding_id: BindingId) -> BrokerResult<NodeId> {
        if let Some(node_id) = self.inner.handles.read().await.binding_node(&binding_id) {
            return Ok(node_id);
        }
        self.inner
            .inventory
            .read()
            .await
            .owner_of_binding(&binding_id)
            .ok_or(BrokerError::UnknownBinding(binding_id))
    }

    /// Send `op` to `node_id` and wait for the correlated reply.
    async fn forward(&self, node_id: NodeId, op: Operation) -> BrokerResult<ReplyBody> {
        let kind = op.kind();
        let envelope = RequestEnvelope::new(op);
        let correlation_id = envelope.correlation_id;
        let payload = encode(&envelope)?;
        let pending = &self.inner.shared.pending;

        let rx = pending.register(correlation_id, node_id, kind).await;
        let subject = self.inner.subjects.node_op(kind, &node_id);
        if let Err(e) = self
            .inner
            .transport
            .publish(&subject, payload, Some(&self.inner.inbox))
            .await
        {
            pending.cancel(&correlation_id).await;
            return Err(e.into());
        }

        let reply = match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(BrokerError::Transport("provisioner stopped".to_string()));
            }
            Err(_) => {
                pending.cancel(&correlation_id).await;
                warn!(
                    node_id = %node_id,
                    op = %kind,
                    correlation_id = %correlation_id,
                    "Node did not reply in time"
                );
                return Err(BrokerError::Timeout { node_id, op: kind });
            }
        };

        self.inner.shared.cache.write().await.observe_reply(
            reply.node_id,
            kind,
            reply.success,
            reply.capacity,
        );

        match reply.into_result()? {
            Ok(body) => Ok(body),
            Err(error) => {
                debug!(node_id = %node_id, op = %kind, error = %error, "Node reported a fault");
                Err(BrokerError::NodeFault {
                    node_id,
                    description: error.description,
                })
            }
        }
    }

    // -------------------------------------------------------------------------
    // Client operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, params))]
    pub async fn provision(&self, plan: &str, params: Value) -> BrokerResult<Credentials> {
        let node_id = self.route(plan).await?;
        let op = Operation::Provision(ProvisionRequest {
            plan: plan.to_string(),
            params,
        });
        match self.forward(node_id, op).await? {
            ReplyBody::Provisioned(credentials) => {
                self.inner
                    .handles
                    .write()
                    .await
                    .record_instance(credentials.name, node_id);
                info!(node_id = %node_id, instance_id = %credentials.name, "Provisioned");
                Ok(credentials)
            }
            body => Err(unexpected(OperationKind::Provision, &body)),
        }
    }

    /// Returns the bindings the node removed along with the instance.
    #[instrument(skip(self))]
    pub async fn unprovision(&self, instance_id: InstanceId) -> BrokerResult<Vec<BindingId>> {
        let node_id = self.instance_owner(instance_id).await?;
        let op = Operation::Unprovision(InstanceRequest { instance_id });
        match self.forward(node_id, op).await? {
            ReplyBody::Unprovisioned {
                removed_bindings, ..
            } => {
                self.inner.handles.write().await.forget_instance(&instance_id);
                self.inner
                    .inventory
                    .write()
                    .await
                    .remove(&node_id, &[instance_id], &removed_bindings);
                Ok(removed_bindings)
            }
            body => Err(unexpected(OperationKind::Unprovision, &body)),
        }
    }

    #[instrument(skip(self, params))]
    pub async fn bind(&self, instance_id: InstanceId, params: Value) -> BrokerResult<Credentials> {
        let node_id = self.instance_owner(instance_id).await?;
        let op = Operation::Bind(BindRequest {
            instance_id,
            params,
        });
        match self.forward(node_id, op).await? {
            ReplyBody::Bound(credentials) => {
                if let Some(binding_id) = credentials.binding_id {
                    self.inner
                        .handles
                        .write()
                        .await
                        .record_binding(binding_id, instance_id, node_id);
                }
                Ok(credentials)
            }
            body => Err(unexpected(OperationKind::Bind, &body)),
        }
    }

    #[instrument(skip(self))]
    pub async fn unbind(&self, binding_id: BindingId) -> BrokerResult<()> {
        let node_id = self.binding_owner(binding_id).await?;
        let op = Operation::Unbind(UnbindRequest { binding_id });
        match self.forward(node_id, op).await? {
            ReplyBody::Unbound { .. } => {
                self.inner.handles.write().await.forget_binding(&binding_id);
                self.inner
                    .inventory
                    .write()
                    .await
                    .remove(&node_id, &[], &[binding_id]);
                Ok(())
            }
            body => Err(unexpected(OperationKind::Unbind, &body)),
        }
    }

    pub async fn restore(&self, instance_id: InstanceId, backup_path: &str) -> BrokerResult<()> {
        let op = Operation::Restore(RestoreRequest {
            instance_id,
            backup_path: backup_path.to_string(),
        });
        self.instance_op(instance_id, op).await
    }

    pub async fn disable(&self, instance_id: InstanceId) -> BrokerResult<()> {
        self.instance_op(instance_id, Operation::Disable(InstanceRequest { instance_id }))
            .await
    }

    pub async fn enable(&self, instance_id: InstanceId) -> BrokerResult<()> {
        self.instance_op(instance_id, Operation::Enable(InstanceRequest { instance_id }))
            .await
    }

    pub async fn import(&self, instance_id: InstanceId, data: &str) -> BrokerResult<()> {
        let op = Operation::Import(ImportRequest {
            instance_id,
            data: data.to_string(),
        });
        self.instance_op(instance_id, op).await
    }

    /// Forward an operation whose success body is a bare acknowledgement.
    async fn instance_op(&self, instance_id: InstanceId, op: Operation) -> BrokerResult<()> {
        let kind = op.kind();
        let node_id = self.instance_owner(instance_id).await?;
        match self.forward(node_id, op).await? {
            ReplyBody::Done { .. } => Ok(()),
            body => Err(unexpected(kind, &body)),
        }
    }

    /// Migrate an instance in place. Costs the node one slot.
    #[instrument(skip(self, params))]
    pub async fn update(&self, instance_id: InstanceId, params: Value) -> BrokerResult<Credentials> {
        let node_id = self.instance_owner(instance_id).await?;
        let op = Operation::Update(UpdateRequest {
            instance_id,
            params,
        });
        match self.forward(node_id, op).await? {
            ReplyBody::Updated(credentials) => Ok(credentials),
            body => Err(unexpected(OperationKind::Update, &body)),
        }
    }

    /// Whether the node managed to clean up the instance's NFS leftovers.
    pub async fn cleanup_nfs(&self, instance_id: InstanceId) -> BrokerResult<bool> {
        let node_id = self.instance_owner(instance_id).await?;
        let op = Operation::CleanupNfs(InstanceRequest { instance_id });
        match self.forward(node_id, op).await? {
            ReplyBody::CleanupNfs { cleaned, .. } => Ok(cleaned),
            body => Err(unexpected(OperationKind::CleanupNfs, &body)),
        }
    }

    // -------------------------------------------------------------------------
    // Orphans
    // -------------------------------------------------------------------------

    /// Ask `node_ids` (every node when empty) for their full inventory.
    ///
    /// Each answer replaces that node's entry wholesale. Nodes that stay
    /// silent keep whatever was cached before.
    #[instrument(skip(self, node_ids), fields(targets = node_ids.len()))]
    pub async fn check_orphan(&self, node_ids: &[NodeId]) -> BrokerResult<OrphanCheck> {
        let envelope = RequestEnvelope::new(Operation::CheckOrphan(CheckOrphanRequest {
            node_ids: node_ids.to_vec(),
        }));
        let mut replies = self
            .inner
            .transport
            .request(
                &self.inner.subjects.check_orphan(),
                encode(&envelope)?,
                self.inner.config.orphan_window,
            )
            .await?;

        let mut responded = Vec::new();
        while let Some(raw) = replies.next().await {
            let reply: ReplyEnvelope = match decode(&raw) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable orphan report");
                    continue;
                }
            };
            let node_id = reply.node_id;
            let capacity = reply.capacity;
            let report = match reply.into_result() {
                Ok(Ok(ReplyBody::Orphans(report))) => report,
                other => {
                    warn!(node_id = %node_id, ?other, "Unexpected orphan check reply");
                    continue;
                }
            };

            debug!(
                node_id = %node_id,
                instances = report.instance_ids.len(),
                bindings = report.binding_ids.len(),
                "Orphan report received"
            );
            self.inner.inventory.write().await.replace(
                node_id,
                report.instance_ids,
                report.binding_ids,
            );
            self.inner.shared.cache.write().await.observe_reply(
                node_id,
                OperationKind::CheckOrphan,
                true,
                capacity,
            );
            responded.push(node_id);
        }

        let orphans = self.restage().await;
        info!(
            responded = responded.len(),
            nodes_with_orphans = orphans.len(),
            "Orphan check complete"
        );
        Ok(OrphanCheck { responded, orphans })
    }

    /// Recompute staged orphans as reported minus known.
    async fn restage(&self) -> BTreeMap<NodeId, OrphanSet> {
        let (known_instances, known_bindings) = {
            let handles = self.inner.handles.read().await;
            (handles.known_instances(), handles.known_bindings())
        };
        let orphans = self
            .inner
            .inventory
            .read()
            .await
            .orphans(&known_instances, &known_bindings);
        *self.inner.staged.write().await = orphans.clone();
        orphans
    }

    /// Ask each selected node to remove its orphan ids.
    ///
    /// Nodes are purged concurrently. A node that faults or times out is
    /// listed in `failed` and its ids stay staged.
    #[instrument(skip(self, selection))]
    pub async fn purge_orphan(&self, selection: PurgeSelection) -> BrokerResult<PurgeSummary> {
        let targets = match selection {
            PurgeSelection::Staged => self.inner.staged.read().await.clone(),
            PurgeSelection::Explicit(targets) => targets,
        };

        let mut requests = JoinSet::new();
        for (node_id, set) in targets {
            if set.is_empty() {
                continue;
            }
            let this = self.clone();
            let op = Operation::PurgeOrphan(PurgeOrphanRequest {
                instance_ids: set.instance_ids,
                binding_ids: set.binding_ids,
            });
            requests.spawn(async move { (node_id, this.forward(node_id, op).await) });
        }

        let mut summary = PurgeSummary::default();
        while let Some(joined) = requests.join_next().await {
            let (node_id, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Purge task panicked");
                    continue;
                }
            };
            match result {
                Ok(ReplyBody::Purged(report)) => {
                    self.forget_purged(node_id, &report).await;
                    summary.reports.insert(node_id, report);
                }
                Ok(body) => {
                    warn!(node_id = %node_id, error = %unexpected(OperationKind::PurgeOrphan, &body), "Purge failed");
                    summary.failed.push(node_id);
                }
                Err(e) => {
                    warn!(node_id = %node_id, error = %e, "Purge failed");
                    summary.failed.push(node_id);
                }
            }
        }

        info!(
            unprovisioned = summary.unprovision_count(),
            unbound = summary.unbind_count(),
            failed = summary.failed.len(),
            "Purge complete"
        );
        Ok(summary)
    }

    /// Drop ids a node confirmed as purged from every derived view.
    async fn forget_purged(&self, node_id: NodeId, report: &PurgeReport) {
        let removed_bindings: Vec<BindingId> = report.removed_bindings().copied().collect();
        self.inner.inventory.write().await.remove(
            &node_id,
            &report.purged_instances,
            &removed_bindings,
        );

        {
            let mut handles = self.inner.handles.write().await;
            for id in &report.purged_instances {
                handles.forget_instance(id);
            }
            for id in &removed_bindings {
                handles.forget_binding(id);
            }
        }

        let mut staged = self.inner.staged.write().await;
        if let Some(set) = staged.get_mut(&node_id) {
            set.instance_ids
                .retain(|id| !report.purged_instances.contains(id));
            set.binding_ids.retain(|id| !removed_bindings.contains(id));
            if set.is_empty() {
                staged.remove(&node_id);
            }
        }
    }

    /// Orphans staged by the last check, minus anything purged since.
    pub async fn staged_orphans(&self) -> BTreeMap<NodeId, OrphanSet> {
        self.inner.staged.read().await.clone()
    }

    /// Instance ids `node_id` last reported.
    pub async fn reported_instances(&self, node_id: &NodeId) -> BTreeSet<InstanceId> {
        self.inner
            .inventory
            .read()
            .await
            .instances(node_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Binding ids `node_id` last reported.
    pub async fn reported_bindings(&self, node_id: &NodeId) -> BTreeSet<BindingId> {
        self.inner
            .inventory
            .read()
            .await
            .bindings(node_id)
            .cloned()
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    pub async fn varz(&self) -> ProvisionerVarz {
        let now = Instant::now();
        let mut nodes: Vec<NodeView> = self
            .inner
            .shared
            .cache
            .read()
            .await
            .records()
            .map(|r| r.view(now))
            .collect();
        nodes.sort_by(|a, b| a.plan.cmp(&b.plan).then(a.id.cmp(&b.id)));

        let (instance_handles, binding_handles) = {
            let handles = self.inner.handles.read().await;
            (handles.instance_count(), handles.binding_count())
        };
        let (reported_instances, reported_bindings) = {
            let inventory = self.inner.inventory.read().await;
            (inventory.instance_count(), inventory.binding_count())
        };
        let (orphan_instances, orphan_bindings) = {
            let staged = self.inner.staged.read().await;
            (
                staged.values().map(|s| s.instance_ids.len()).sum(),
                staged.values().map(|s| s.binding_ids.len()).sum(),
            )
        };

        ProvisionerVarz {
            service: self.inner.subjects.service().to_string(),
            nodes,
            pending_requests: self.inner.shared.pending.len().await,
            instance_handles,
            binding_handles,
            reported_instances,
            reported_bindings,
            orphan_instances,
            orphan_bindings,
        }
    }
}

/// Decode a broadcast reply, logging what cannot be used.
fn decode_reply(raw: &[u8]) -> Option<Result<ReplyBody, svcb_proto::ReplyError>> {
    let reply: ReplyEnvelope = match decode(raw) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Dropping undecodable reply");
            return None;
        }
    };
    match reply.into_result() {
        Ok(result) => Some(result),
        Err(e) => {
            warn!(error = %e, "Dropping malformed reply");
            None
        }
    }
}

fn unexpected(kind: OperationKind, body: &ReplyBody) -> BrokerError {
    BrokerError::Transport(format!("unexpected {kind} reply: {body:?}"))
}
