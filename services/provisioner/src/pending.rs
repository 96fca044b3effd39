//! Outstanding point-to-point requests, keyed by correlation id.
//!
//! An entry is resolved at most once: either the dispatcher hands it the
//! matching reply, or the waiting caller times out and removes it. Whatever
//! arrives afterwards for that id finds no entry and is dropped.

use std::collections::HashMap;

use svcb_id::{CorrelationId, NodeId};
use svcb_proto::{OperationKind, ReplyEnvelope};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

#[derive(Debug)]
struct PendingRequest {
    node_id: NodeId,
    op: OperationKind,
    tx: oneshot::Sender<ReplyEnvelope>,
}

#[derive(Debug, Default)]
pub struct PendingRequests {
    requests: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request sent to `node_id`; the receiver gets its reply.
    pub async fn register(
        &self,
        correlation_id: CorrelationId,
        node_id: NodeId,
        op: OperationKind,
    ) -> oneshot::Receiver<ReplyEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .lock()
            .await
            .insert(correlation_id, PendingRequest { node_id, op, tx });
        rx
    }

    /// Hand `reply` to whoever is waiting for it. Returns false if nobody is.
    pub async fn resolve(&self, reply: ReplyEnvelope) -> bool {
        let Some(pending) = self.requests.lock().await.remove(&reply.correlation_id) else {
            return false;
        };
        if pending.node_id != reply.node_id {
            debug!(
                correlation_id = %reply.correlation_id,
                expected = %pending.node_id,
                actual = %reply.node_id,
                op = %pending.op,
                "Reply came from a different node than the request targeted"
            );
        }
        pending.tx.send(reply).is_ok()
    }

    /// Stop waiting for `correlation_id`.
    pub async fn cancel(&self, correlation_id: &CorrelationId) {
        self.requests.lock().await.remove(correlation_id);
    }

    pub async fn len(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use svcb_proto::{ReplyBody, ReplyEnvelope};
    use svcb_id::InstanceId;

    use super::*;

    fn reply(correlation_id: CorrelationId, node_id: NodeId) -> ReplyEnvelope {
        ReplyEnvelope::ok(
            correlation_id,
            node_id,
            3,
            ReplyBody::Done {
                instance_id: InstanceId::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let pending = PendingRequests::new();
        let (corr, node) = (CorrelationId::new(), NodeId::new());
        let rx = pending.register(corr, node, OperationKind::Restore).await;

        assert!(pending.resolve(reply(corr, node)).await);
        assert!(!pending.resolve(reply(corr, node)).await);
        assert_eq!(rx.await.unwrap().capacity, 3);
        assert_eq!(pending.len().await, 0);
    }

    #[tokio::test]
    async fn test_late_reply_after_cancel_is_dropped() {
        let pending = PendingRequests::new();
        let (corr, node) = (CorrelationId::new(), NodeId::new());
        let _rx = pending.register(corr, node, OperationKind::Provision).await;

        pending.cancel(&corr).await;

        assert!(!pending.resolve(reply(corr, node)).await);
    }

    #[tokio::test]
    async fn test_unknown_reply_is_dropped() {
        let pending = PendingRequests::new();
        assert!(!pending.resolve(reply(CorrelationId::new(), NodeId::new())).await);
    }
}
