//! Subject naming.
//!
//! - `{service}.discover`: discovery broadcast, the plan travels in the body
//! - `{service}.announce`: unsolicited node announcements
//! - `{service}.check_orphan`: orphan-check broadcast
//! - `{service}.{op}.{node_id}`: point-to-point operations

use svcb_id::NodeId;

use crate::OperationKind;

/// Service name used when none is configured.
pub const DEFAULT_SERVICE: &str = "svcb";

/// Subject builder for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    service: String,
}

impl Subjects {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn discover(&self) -> String {
        format!("{}.discover", self.service)
    }

    pub fn announce(&self) -> String {
        format!("{}.announce", self.service)
    }

    pub fn check_orphan(&self) -> String {
        format!("{}.check_orphan", self.service)
    }

    /// Point-to-point subject for `kind` on `node_id`.
    pub fn node_op(&self, kind: OperationKind, node_id: &NodeId) -> String {
        format!("{}.{}.{}", self.service, kind.as_str(), node_id)
    }
}

impl Default for Subjects {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}
