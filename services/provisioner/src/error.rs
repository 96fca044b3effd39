//! Broker errors.
//!
//! Every variant is what a client sees as "service unavailable"; the
//! variants only differ in what gets logged.

use svcb_bus::BusError;
use svcb_id::{BindingId, InstanceId, NodeId};
use svcb_proto::{OperationKind, ProtoError};
use thiserror::Error;

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The node replied with an error. The description is relayed verbatim
    /// and already starts with "Service unavailable".
    #[error("{description}")]
    NodeFault {
        node_id: NodeId,
        description: String,
    },

    /// No reply within the request timeout.
    #[error("Service unavailable: {op} on {node_id} timed out")]
    Timeout { node_id: NodeId, op: OperationKind },

    /// No cached node can take the request. Nothing was sent.
    #[error("Service unavailable: no node with free capacity for plan {plan}")]
    NoCapacity { plan: String },

    #[error("Service unavailable: unknown instance {0}")]
    UnknownInstance(InstanceId),

    #[error("Service unavailable: unknown binding {0}")]
    UnknownBinding(BindingId),

    /// The bus or the codec failed, or the provisioner is shutting down.
    #[error("Service unavailable: transport error: {0}")]
    Transport(String),
}

impl BrokerError {
    /// Whether the failure came from a node that did not answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::Timeout { .. })
    }
}

impl From<BusError> for BrokerError {
    fn from(e: BusError) -> Self {
        BrokerError::Transport(e.to_string())
    }
}

impl From<ProtoError> for BrokerError {
    fn from(e: ProtoError) -> Self {
        BrokerError::Transport(e.to_string())
    }
}
