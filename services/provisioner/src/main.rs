//! Service broker provisioner, dev mode.
//!
//! Runs an in-process bus, the provisioner, and one node per plan listed in
//! `SVCB_LOCAL_NODES`. The provisioner's probes are served at the root and
//! each node's probes under `/nodes/{node_id}`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use svcb_bus::{MemoryBus, Transport};
use svcb_id::NodeId;
use svcb_node::{MemoryBackend, NodeConfig};
use svcb_provisioner::{status, Provisioner, ProvisionerConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ProvisionerConfig::from_env()?;

    // Prefer RUST_LOG, fall back to SVCB_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        service = %config.service,
        listen_addr = %config.listen_addr,
        local_nodes = ?config.local_nodes,
        "Starting provisioner"
    );

    let transport: Arc<dyn Transport> = Arc::new(MemoryBus::new());

    // Everything but id, service and plan comes from the node variables
    let node_defaults = NodeConfig::from_env()?;
    let mut nodes = Vec::with_capacity(config.local_nodes.len());
    for plan in &config.local_nodes {
        let node_config = NodeConfig {
            node_id: NodeId::new(),
            service: config.service.clone(),
            plan: plan.clone(),
            ..node_defaults.clone()
        };
        let backend = Arc::new(MemoryBackend::new(
            node_config.node_id,
            node_config.hostname.clone(),
        ));
        let node = svcb_node::start(node_config, transport.clone(), backend).await?;
        info!(node_id = %node.node_id(), plan = %plan, "Local node started");
        nodes.push(node);
    }

    let provisioner = Provisioner::start(config.clone(), transport).await?;
    for plan in &config.local_nodes {
        let found = provisioner.discover(plan).await?;
        info!(plan = %plan, nodes = found.len(), "Initial discovery");
    }

    let mut app = status::router(provisioner.clone());
    for node in &nodes {
        app = app.nest(
            &format!("/nodes/{}", node.node_id()),
            svcb_node::status::router(node.client()),
        );
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Serving probes");

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        result = server => match result {
            Ok(Ok(())) => info!("Probe server exited"),
            Ok(Err(e)) => error!(error = %e, "Probe server failed"),
            Err(e) => error!(error = %e, "Probe server panicked"),
        },
    }

    let _ = shutdown_tx.send(true);

    let shutdown_timeout = Duration::from_secs(10);
    if tokio::time::timeout(shutdown_timeout, provisioner.shutdown())
        .await
        .is_err()
    {
        warn!("Provisioner did not shut down in time");
    }
    for node in nodes {
        let node_id = node.node_id();
        if tokio::time::timeout(shutdown_timeout, node.shutdown())
            .await
            .is_err()
        {
            warn!(node_id = %node_id, "Node did not shut down in time");
        }
    }

    info!("Provisioner shutdown complete");
    Ok(())
}
