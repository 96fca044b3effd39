//! Cached view of the fleet.
//!
//! Capacity here is advisory. A record's capacity is only ever copied from
//! that node's own announcement or reply, never computed locally.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use svcb_capacity::{verify, Capacity};
use svcb_id::NodeId;
use svcb_proto::{Announcement, OperationKind};
use tokio::time::Instant;
use tracing::{debug, info};

/// What the provisioner knows about one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub plan: String,
    pub capacity: Capacity,
    pub last_announced: Instant,
}

impl NodeRecord {
    pub fn is_stale(&self, now: Instant, node_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_announced) > node_timeout
    }

    pub fn view(&self, now: Instant) -> NodeView {
        NodeView {
            id: self.id,
            plan: self.plan.clone(),
            capacity: self.capacity.get(),
            silent_secs: now.saturating_duration_since(self.last_announced).as_secs(),
        }
    }
}

/// Serializable form of a [`NodeRecord`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub plan: String,
    pub capacity: u32,
    pub silent_secs: u64,
}

/// Node records keyed by id. Last reply wins.
#[derive(Debug, Default)]
pub struct NodeCache {
    nodes: HashMap<NodeId, NodeRecord>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a node from its announcement.
    pub fn merge_announcement(&mut self, announcement: &Announcement, now: Instant) {
        let capacity = Capacity::new(announcement.capacity);
        match self.nodes.get_mut(&announcement.node_id) {
            Some(record) => {
                record.plan.clone_from(&announcement.plan);
                record.capacity = capacity;
                record.last_announced = now;
            }
            None => {
                info!(
                    node_id = %announcement.node_id,
                    plan = %announcement.plan,
                    capacity = announcement.capacity,
                    "Discovered node"
                );
                self.nodes.insert(
                    announcement.node_id,
                    NodeRecord {
                        id: announcement.node_id,
                        plan: announcement.plan.clone(),
                        capacity,
                        last_announced: now,
                    },
                );
            }
        }
    }

    /// Overwrite a node's capacity from the value it reported after `kind`.
    ///
    /// If the cached value did not predict the reported one, the cache was
    /// stale; that is only logged. Unknown nodes are ignored until they
    /// announce.
    pub fn observe_reply(&mut self, node_id: NodeId, kind: OperationKind, succeeded: bool, reported: u32) {
        let Some(record) = self.nodes.get_mut(&node_id) else {
            debug!(node_id = %node_id, "Reply from uncached node");
            return;
        };

        let reported = Capacity::new(reported);
        if let Err(e) = verify(kind, record.capacity, reported, succeeded) {
            info!(
                node_id = %node_id,
                cached = %record.capacity,
                %reported,
                error = %e,
                "Capacity cache was stale, overwriting"
            );
        }
        record.capacity = reported;
    }

    /// Pick the node that should take a request for `plan`.
    ///
    /// Highest free capacity wins; ties go to the most recent announcement.
    /// Stale and full nodes are never picked. Only ready nodes announce, so a
    /// node that turns unready drops out once it goes stale.
    pub fn select(&self, plan: &str, now: Instant, node_timeout: Duration) -> Option<NodeId> {
        self.nodes
            .values()
            .filter(|r| r.plan == plan && r.capacity.is_available())
            .filter(|r| !r.is_stale(now, node_timeout))
            .max_by(|a, b| {
                a.capacity
                    .cmp(&b.capacity)
                    .then(a.last_announced.cmp(&b.last_announced))
            })
            .map(|r| r.id)
    }

    /// Drop every record silent for longer than `node_timeout`.
    pub fn prune_stale(&mut self, now: Instant, node_timeout: Duration) -> Vec<NodeId> {
        let stale: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|r| r.is_stale(now, node_timeout))
            .map(|r| r.id)
            .collect();
        for id in &stale {
            self.nodes.remove(id);
        }
        stale
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(node_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }
}
