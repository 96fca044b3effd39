//! Configuration for a node.

use std::time::Duration;

use anyhow::{Context, Result};
use svcb_id::NodeId;
use svcb_proto::DEFAULT_SERVICE;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique identifier for this node.
    pub node_id: NodeId,

    /// Service name; prefixes every subject.
    pub service: String,

    /// The plan this node serves.
    pub plan: String,

    /// Free provisioning slots at startup.
    pub capacity: u32,

    /// Whether the node answers discovery at startup.
    pub ready: bool,

    /// Interval between unsolicited announcements.
    pub announce_interval: Duration,

    /// Hostname handed out in credentials.
    pub hostname: String,

    /// Pre-existing instances to load at startup.
    pub seed_instances: usize,

    /// Pre-existing bindings to load at startup.
    pub seed_bindings: usize,

    /// Mailbox size of the node actor.
    pub mailbox_size: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(),
            service: DEFAULT_SERVICE.to_string(),
            plan: "free".to_string(),
            capacity: 200,
            ready: true,
            announce_interval: Duration::from_secs(30),
            hostname: "127.0.0.1".to_string(),
            seed_instances: 0,
            seed_bindings: 0,
            mailbox_size: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Config for a node serving `plan`, everything else defaulted.
    pub fn for_plan(plan: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from `lookup`, which maps variable names to values.
    ///
    /// Unset variables take their defaults; set but unparsable ones are
    /// errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let node_id = match lookup("SVCB_NODE_ID") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid SVCB_NODE_ID {raw:?}"))?,
            None => defaults.node_id,
        };

        let capacity = match lookup("SVCB_CAPACITY") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid SVCB_CAPACITY {raw:?}"))?,
            None => defaults.capacity,
        };

        let announce_interval = match lookup("SVCB_ANNOUNCE_INTERVAL") {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .with_context(|| format!("invalid SVCB_ANNOUNCE_INTERVAL {raw:?}"))?,
            ),
            None => defaults.announce_interval,
        };

        Ok(Self {
            node_id,
            service: lookup("SVCB_SERVICE").unwrap_or(defaults.service),
            plan: lookup("SVCB_PLAN").unwrap_or(defaults.plan),
            capacity,
            announce_interval,
            hostname: lookup("SVCB_HOSTNAME").unwrap_or(defaults.hostname),
            log_level: lookup("SVCB_LOG_LEVEL").unwrap_or(defaults.log_level),
            ..defaults
        })
    }
}
