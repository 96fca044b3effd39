//! Request envelope and operation payloads.

use serde::{Deserialize, Serialize};
use svcb_id::{BindingId, CorrelationId, InstanceId, NodeId};

/// The kinds of operation a Node answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Discover,
    Provision,
    Unprovision,
    Bind,
    Unbind,
    Restore,
    Disable,
    Enable,
    Import,
    Update,
    #[serde(rename = "cleanupnfs")]
    CleanupNfs,
    CheckOrphan,
    PurgeOrphan,
}

impl OperationKind {
    /// Operations addressed to a single node's subject.
    pub const POINT_TO_POINT: [OperationKind; 11] = [
        OperationKind::Provision,
        OperationKind::Unprovision,
        OperationKind::Bind,
        OperationKind::Unbind,
        OperationKind::Restore,
        OperationKind::Disable,
        OperationKind::Enable,
        OperationKind::Import,
        OperationKind::Update,
        OperationKind::CleanupNfs,
        OperationKind::PurgeOrphan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Discover => "discover",
            OperationKind::Provision => "provision",
            OperationKind::Unprovision => "unprovision",
            OperationKind::Bind => "bind",
            OperationKind::Unbind => "unbind",
            OperationKind::Restore => "restore",
            OperationKind::Disable => "disable",
            OperationKind::Enable => "enable",
            OperationKind::Import => "import",
            OperationKind::Update => "update",
            OperationKind::CleanupNfs => "cleanupnfs",
            OperationKind::CheckOrphan => "check_orphan",
            OperationKind::PurgeOrphan => "purge_orphan",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discovery broadcast, scoped to one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverRequest {
    pub plan: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub plan: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindRequest {
    pub instance_id: InstanceId,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnbindRequest {
    pub binding_id: BindingId,
}

/// Operations that only name an existing instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub instance_id: InstanceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub instance_id: InstanceId,
    pub backup_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub instance_id: InstanceId,
    /// Location of the dump to load.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub instance_id: InstanceId,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Orphan check broadcast. An empty `node_ids` addresses every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckOrphanRequest {
    #[serde(default)]
    pub node_ids: Vec<NodeId>,
}

impl CheckOrphanRequest {
    /// Whether `node_id` should answer this broadcast.
    pub fn addresses(&self, node_id: &NodeId) -> bool {
        self.node_ids.is_empty() || self.node_ids.contains(node_id)
    }
}

/// Explicit set of ids for one node to remove.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurgeOrphanRequest {
    #[serde(default)]
    pub instance_ids: Vec<InstanceId>,
    #[serde(default)]
    pub binding_ids: Vec<BindingId>,
}

impl PurgeOrphanRequest {
    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty() && self.binding_ids.is_empty()
    }
}

/// One operation and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Discover(DiscoverRequest),
    Provision(ProvisionRequest),
    Unprovision(InstanceRequest),
    Bind(BindRequest),
    Unbind(UnbindRequest),
    Restore(RestoreRequest),
    Disable(InstanceRequest),
    Enable(InstanceRequest),
    Import(ImportRequest),
    Update(UpdateRequest),
    #[serde(rename = "cleanupnfs")]
    CleanupNfs(InstanceRequest),
    CheckOrphan(CheckOrphanRequest),
    PurgeOrphan(PurgeOrphanRequest),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Discover(_) => OperationKind::Discover,
            Operation::Provision(_) => OperationKind::Provision,
            Operation::Unprovision(_) => OperationKind::Unprovision,
            Operation::Bind(_) => OperationKind::Bind,
            Operation::Unbind(_) => OperationKind::Unbind,
            Operation::Restore(_) => OperationKind::Restore,
            Operation::Disable(_) => OperationKind::Disable,
            Operation::Enable(_) => OperationKind::Enable,
            Operation::Import(_) => OperationKind::Import,
            Operation::Update(_) => OperationKind::Update,
            Operation::CleanupNfs(_) => OperationKind::CleanupNfs,
            Operation::CheckOrphan(_) => OperationKind::CheckOrphan,
            Operation::PurgeOrphan(_) => OperationKind::PurgeOrphan,
        }
    }

    /// The instance this operation targets, if it targets exactly one.
    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            Operation::Unprovision(r)
            | Operation::Disable(r)
            | Operation::Enable(r)
            | Operation::CleanupNfs(r) => Some(r.instance_id),
            Operation::Bind(r) => Some(r.instance_id),
            Operation::Restore(r) => Some(r.instance_id),
            Operation::Import(r) => Some(r.instance_id),
            Operation::Update(r) => Some(r.instance_id),
            _ => None,
        }
    }
}

/// A request as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub correlation_id: CorrelationId,
    pub op: Operation,
}

impl RequestEnvelope {
    /// Wrap `op` with a fresh correlation id.
    pub fn new(op: Operation) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            op,
        }
    }
}
