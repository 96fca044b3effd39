//! Node error types.

use svcb_bus::BusError;
use thiserror::Error;

use crate::actors::ActorError;

/// Errors surfaced by a node's handle.
///
/// Faults inside request handlers never show up here; they are turned into
/// error replies on the bus.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Subscribing to one of the node's subjects failed.
    #[error("transport error: {0}")]
    Bus(#[from] BusError),

    /// The node actor is gone.
    #[error("node stopped")]
    Stopped,
}

impl From<ActorError> for NodeError {
    fn from(_: ActorError) -> Self {
        NodeError::Stopped
    }
}
