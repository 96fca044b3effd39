//! Reply envelope, bodies, and the uniform node-fault error.

use serde::{Deserialize, Serialize};
use svcb_id::{BindingId, CorrelationId, InstanceId, NodeId};

use crate::ProtoError;

/// Literal prefix of every node-fault description.
pub const SERVICE_UNAVAILABLE: &str = "Service unavailable";

/// A node's answer to a discovery broadcast, or its unsolicited heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub node_id: NodeId,
    pub plan: String,
    pub capacity: u32,
}

/// Connection details handed back for an instance or binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Instance the credentials belong to.
    pub name: InstanceId,
    /// Set for binding credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_id: Option<BindingId>,
    pub node_id: NodeId,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Every instance and binding a node owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanReport {
    pub instance_ids: Vec<InstanceId>,
    pub binding_ids: Vec<BindingId>,
}

/// What a purge actually removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub purged_instances: Vec<InstanceId>,
    pub purged_bindings: Vec<BindingId>,
    /// Bindings that went away with a purged instance without being named.
    #[serde(default)]
    pub cascaded_bindings: Vec<BindingId>,
}

impl PurgeReport {
    pub fn unprovision_count(&self) -> usize {
        self.purged_instances.len()
    }

    pub fn unbind_count(&self) -> usize {
        self.purged_bindings.len()
    }

    /// Every binding id no longer present on the node.
    pub fn removed_bindings(&self) -> impl Iterator<Item = &BindingId> {
        self.purged_bindings.iter().chain(&self.cascaded_bindings)
    }
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyBody {
    Announcement(Announcement),
    Provisioned(Credentials),
    Unprovisioned {
        instance_id: InstanceId,
        /// Bindings removed along with the instance.
        removed_bindings: Vec<BindingId>,
    },
    Bound(Credentials),
    Unbound {
        binding_id: BindingId,
    },
    /// Restore, disable, enable, and import acknowledge the instance.
    Done {
        instance_id: InstanceId,
    },
    Updated(Credentials),
    CleanupNfs {
        instance_id: InstanceId,
        cleaned: bool,
    },
    Orphans(OrphanReport),
    Purged(PurgeReport),
}

/// Classification of a node-side fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ServiceUnavailable,
}

/// A node-side fault, reported in-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    pub code: ErrorCode,
    pub description: String,
}

impl ReplyError {
    /// A fault whose description reads `Service unavailable: {detail}`.
    pub fn service_unavailable(detail: impl std::fmt::Display) -> Self {
        Self {
            code: ErrorCode::ServiceUnavailable,
            description: format!("{SERVICE_UNAVAILABLE}: {detail}"),
        }
    }
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description)
    }
}

impl std::error::Error for ReplyError {}

/// A reply as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub correlation_id: CorrelationId,
    pub node_id: NodeId,
    /// The node's capacity after handling the request.
    pub capacity: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ReplyBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl ReplyEnvelope {
    pub fn ok(correlation_id: CorrelationId, node_id: NodeId, capacity: u32, body: ReplyBody) -> Self {
        Self {
            correlation_id,
            node_id,
            capacity,
            success: true,
            body: Some(body),
            error: None,
        }
    }

    pub fn fault(
        correlation_id: CorrelationId,
        node_id: NodeId,
        capacity: u32,
        error: ReplyError,
    ) -> Self {
        Self {
            correlation_id,
            node_id,
            capacity,
            success: false,
            body: None,
            error: Some(error),
        }
    }

    /// Split into the success body or the fault.
    ///
    /// The outer error is for envelopes that contradict their own flag.
    pub fn into_result(self) -> Result<Result<ReplyBody, ReplyError>, ProtoError> {
        match (self.success, self.body, self.error) {
            (true, Some(body), _) => Ok(Ok(body)),
            (false, _, Some(error)) => Ok(Err(error)),
            (true, None, _) => Err(ProtoError::MalformedReply(
                "success without body".to_string(),
            )),
            (false, _, None) => Err(ProtoError::MalformedReply(
                "failure without error".to_string(),
            )),
        }
    }
}
