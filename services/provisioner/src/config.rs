//! Configuration for the provisioner.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use svcb_proto::DEFAULT_SERVICE;

/// Provisioner configuration.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Service name; prefixes every subject.
    pub service: String,

    /// How long a point-to-point request waits for its reply.
    pub request_timeout: Duration,

    /// Aggregation window for discovery broadcasts.
    pub discover_window: Duration,

    /// Aggregation window for orphan-check broadcasts.
    pub orphan_window: Duration,

    /// Silence after which a node is excluded from routing and pruned.
    pub node_timeout: Duration,

    /// How often stale nodes are pruned.
    pub prune_interval: Duration,

    /// Address the status probes listen on.
    pub listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Plans of nodes to run in-process (dev binary only).
    pub local_nodes: Vec<String>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            request_timeout: Duration::from_secs(5),
            discover_window: Duration::from_millis(500),
            orphan_window: Duration::from_secs(2),
            node_timeout: Duration::from_secs(120),
            prune_interval: Duration::from_secs(30),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            local_nodes: Vec::new(),
        }
    }
}

impl ProvisionerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let service = std::env::var("SVCB_SERVICE").unwrap_or(defaults.service);

        let request_timeout = env_duration_ms("SVCB_REQUEST_TIMEOUT_MS")?
            .unwrap_or(defaults.request_timeout);
        let discover_window = env_duration_ms("SVCB_DISCOVER_WINDOW_MS")?
            .unwrap_or(defaults.discover_window);
        let orphan_window = env_duration_ms("SVCB_ORPHAN_WINDOW_MS")?
            .unwrap_or(defaults.orphan_window);

        let node_timeout = match std::env::var("SVCB_NODE_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse()
                    .with_context(|| format!("invalid SVCB_NODE_TIMEOUT_SECS {raw:?}"))?,
            ),
            Err(_) => defaults.node_timeout,
        };

        let listen_addr = match std::env::var("SVCB_LISTEN_ADDR") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid SVCB_LISTEN_ADDR {raw:?}"))?,
            Err(_) => defaults.listen_addr,
        };

        let log_level = std::env::var("SVCB_LOG_LEVEL").unwrap_or(defaults.log_level);

        let local_nodes = std::env::var("SVCB_LOCAL_NODES")
            .map(|raw| parse_plans(&raw))
            .unwrap_or(defaults.local_nodes);

        Ok(Self {
            service,
            request_timeout,
            discover_window,
            orphan_window,
            node_timeout,
            prune_interval: (node_timeout / 4).max(Duration::from_secs(1)),
            listen_addr,
            log_level,
            local_nodes,
        })
    }
}

fn env_duration_ms(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(raw) => {
            let ms: u64 = raw
                .parse()
                .with_context(|| format!("invalid {key} {raw:?}"))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(None),
    }
}

fn parse_plans(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|plan| !plan.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plans_skips_blanks() {
        assert_eq!(parse_plans("free, nonfree,,"), vec!["free", "nonfree"]);
        assert!(parse_plans("").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.service, "svcb");
        assert!(config.discover_window < config.request_timeout);
        assert!(config.local_nodes.is_empty());
    }
}
