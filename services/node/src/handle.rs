//! Node startup and the handle used to drive it.

use std::sync::Arc;

use svcb_bus::{Subscription, Transport};
use svcb_id::NodeId;
use svcb_proto::{OperationKind, Subjects};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actors::{spawn_actor, ActorHandle, NodeActor, NodeMessage, NodeSnapshot};
use crate::announce::run_announce_loop;
use crate::backend::ServiceBackend;
use crate::config::NodeConfig;
use crate::error::NodeError;

/// Clonable channel into a running node.
#[derive(Clone)]
pub struct NodeClient {
    node_id: NodeId,
    actor: ActorHandle<NodeMessage>,
}

impl NodeClient {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Current state of the node.
    pub async fn snapshot(&self) -> Result<NodeSnapshot, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.actor.send(NodeMessage::Snapshot(tx)).await?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Like [`snapshot`](Self::snapshot), but counted as a varz invocation.
    pub async fn varz(&self) -> Result<NodeSnapshot, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.actor.send(NodeMessage::Varz(tx)).await?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// The node's authoritative capacity.
    pub async fn capacity(&self) -> Result<u32, NodeError> {
        Ok(self.snapshot().await?.capacity)
    }

    pub async fn set_ready(&self, ready: bool) -> Result<(), NodeError> {
        self.actor.send(NodeMessage::SetReady(ready)).await?;
        Ok(())
    }

    /// Publish an announcement now instead of waiting for the timer.
    pub async fn announce(&self) -> Result<(), NodeError> {
        self.actor.send(NodeMessage::Announce).await?;
        Ok(())
    }
}

/// A running node. Dropping it without [`shutdown`](Self::shutdown) leaves
/// the tasks running until the transport closes.
pub struct NodeHandle {
    client: NodeClient,
    plan: String,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn node_id(&self) -> NodeId {
        self.client.node_id
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn client(&self) -> NodeClient {
        self.client.clone()
    }

    pub async fn snapshot(&self) -> Result<NodeSnapshot, NodeError> {
        self.client.snapshot().await
    }

    pub async fn capacity(&self) -> Result<u32, NodeError> {
        self.client.capacity().await
    }

    pub async fn set_ready(&self, ready: bool) -> Result<(), NodeError> {
        self.client.set_ready(ready).await
    }

    /// Stop every task belonging to this node and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(node_id = %self.client.node_id, error = %e, "Node task panicked");
            }
        }
        info!(node_id = %self.client.node_id, "Node stopped");
    }
}

/// Start a node on `transport`.
///
/// Every subscription is in place before this returns, so a request
/// published afterwards is seen by the node.
pub async fn start(
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    backend: Arc<dyn ServiceBackend>,
) -> Result<NodeHandle, NodeError> {
    let subjects = Subjects::new(config.service.clone());

    let mut subscriptions = vec![
        transport.subscribe(&subjects.discover()).await?,
        transport.subscribe(&subjects.check_orphan()).await?,
    ];
    for kind in OperationKind::POINT_TO_POINT {
        subscriptions.push(
            transport
                .subscribe(&subjects.node_op(kind, &config.node_id))
                .await?,
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let actor = NodeActor::new(&config, transport, backend);
    let (actor_handle, actor_task) = spawn_actor(actor, config.mailbox_size, shutdown_rx.clone());

    let mut tasks = Vec::with_capacity(subscriptions.len() + 2);
    tasks.push(actor_task);
    for subscription in subscriptions {
        tasks.push(tokio::spawn(pump(
            subscription,
            actor_handle.clone(),
            shutdown_rx.clone(),
        )));
    }
    tasks.push(tokio::spawn(run_announce_loop(
        actor_handle.clone(),
        config.announce_interval,
        shutdown_rx,
    )));

    info!(
        node_id = %config.node_id,
        service = %subjects.service(),
        plan = %config.plan,
        "Node listening"
    );

    Ok(NodeHandle {
        client: NodeClient {
            node_id: config.node_id,
            actor: actor_handle,
        },
        plan: config.plan,
        shutdown_tx,
        tasks,
    })
}

/// Forward one subscription into the node's mailbox.
async fn pump(
    mut subscription: Subscription,
    actor: ActorHandle<NodeMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            msg = subscription.next() => {
                let Some(msg) = msg else {
                    debug!(subject = %subscription.subject(), "Subscription closed");
                    break;
                };
                if actor.send(NodeMessage::Request(msg)).await.is_err() {
                    break;
                }
            }
        }
    }
}
