//! Test fleets.
//!
//! A [`Fleet`] is one in-process bus, one provisioner, and any number of
//! nodes. Everything is built from explicit configs and torn down by
//! [`Fleet::shutdown`]; nothing is shared between fleets.

use std::sync::Arc;
use std::time::Duration;

use svcb_bus::{MemoryBus, Transport};
use svcb_id::NodeId;
use svcb_node::{MemoryBackend, NodeClient, NodeConfig, NodeHandle, ServiceBackend};
use svcb_provisioner::{Provisioner, ProvisionerConfig};

/// Route test logs through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "svcb_provisioner=debug,svcb_node=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Provisioner config with windows short enough for tests.
pub fn provisioner_config() -> ProvisionerConfig {
    ProvisionerConfig {
        request_timeout: Duration::from_secs(2),
        discover_window: Duration::from_millis(150),
        orphan_window: Duration::from_secs(1),
        ..ProvisionerConfig::default()
    }
}

/// Node config for `plan` that keeps quiet between tests' own actions.
pub fn node_config(plan: &str) -> NodeConfig {
    NodeConfig {
        announce_interval: Duration::from_secs(3600),
        ..NodeConfig::for_plan(plan)
    }
}

pub struct Fleet {
    pub bus: MemoryBus,
    pub provisioner: Provisioner,
    nodes: Vec<NodeHandle>,
}

impl Fleet {
    /// A fleet with no nodes yet.
    pub async fn new(config: ProvisionerConfig) -> Self {
        init_tracing();
        let bus = MemoryBus::new();
        let provisioner = Provisioner::start(config, Arc::new(bus.clone()))
            .await
            .expect("provisioner failed to start");
        Self {
            bus,
            provisioner,
            nodes: Vec::new(),
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.bus.clone())
    }

    /// Start a node whose backend always succeeds.
    pub async fn spawn_node(&mut self, config: NodeConfig) -> NodeClient {
        let backend = Arc::new(MemoryBackend::new(config.node_id, "localhost"));
        self.spawn_with_backend(config, backend).await
    }

    /// Start a node whose backend faults on every call.
    pub async fn spawn_error_node(&mut self, config: NodeConfig) -> NodeClient {
        let backend = Arc::new(MemoryBackend::failing(config.node_id, "localhost"));
        self.spawn_with_backend(config, backend).await
    }

    pub async fn spawn_with_backend(
        &mut self,
        config: NodeConfig,
        backend: Arc<dyn ServiceBackend>,
    ) -> NodeClient {
        let node = svcb_node::start(config, self.transport(), backend)
            .await
            .expect("node failed to start");
        let client = node.client();
        self.nodes.push(node);
        client
    }

    /// Stop one node, leaving the rest of the fleet running.
    pub async fn stop_node(&mut self, node_id: NodeId) {
        if let Some(pos) = self.nodes.iter().position(|n| n.node_id() == node_id) {
            self.nodes.remove(pos).shutdown().await;
        }
    }

    pub async fn shutdown(self) {
        self.provisioner.shutdown().await;
        for node in self.nodes {
            node.shutdown().await;
        }
        self.bus.close().await;
    }
}
