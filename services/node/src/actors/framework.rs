//! Minimal single-mailbox actor runtime.
//!
//! An actor owns its state outright and sees one message at a time. The
//! only ways in are an [`ActorHandle`] and the shared shutdown signal.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What the loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Send + Debug + 'static;

    /// Short name used as the prefix of the actor id in logs.
    fn name(&self) -> &'static str;

    async fn handle(&mut self, msg: Self::Message) -> Result<Flow, ActorError>;

    async fn started(&mut self) -> Result<(), ActorError> {
        Ok(())
    }

    async fn stopped(&mut self, _stats: &MailboxStats) {}
}

/// Bookkeeping kept by the loop, handed to [`Actor::stopped`].
#[derive(Debug, Clone, Default)]
pub struct MailboxStats {
    pub processed: u64,
    pub failed: u64,
    pub last_message_at: Option<Instant>,
}

#[derive(Debug, Error)]
pub enum ActorError {
    /// Logged; the actor keeps going.
    #[error("transient error: {0}")]
    Transient(String),

    /// Logged; the actor stops.
    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("mailbox full")]
    MailboxFull,

    #[error("actor stopped")]
    ActorStopped,
}

/// Sending side of an actor's mailbox.
pub struct ActorHandle<M> {
    tx: mpsc::Sender<M>,
    actor_id: Arc<str>,
}

impl<M> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: Arc::clone(&self.actor_id),
        }
    }
}

impl<M: Send + Debug + 'static> ActorHandle<M> {
    /// Enqueue `msg`, waiting while the mailbox is full.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.send(msg).await.map_err(|_| ActorError::ActorStopped)
    }

    /// Enqueue `msg` only if there is room right now.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ActorError::MailboxFull,
            mpsc::error::TrySendError::Closed(_) => ActorError::ActorStopped,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

/// Run `actor` on a new task with a mailbox of `mailbox_size`.
///
/// The loop ends when `shutdown` becomes `true` or its sender goes away,
/// when every handle is dropped, or when the actor asks to stop or fails
/// permanently.
pub fn spawn_actor<A: Actor>(
    actor: A,
    mailbox_size: usize,
    shutdown: watch::Receiver<bool>,
) -> (ActorHandle<A::Message>, JoinHandle<()>) {
    let actor_id: Arc<str> = format!("{}_{}", actor.name(), svcb_id::Ulid::new()).into();
    let (tx, rx) = mpsc::channel(mailbox_size.max(1));

    let task = tokio::spawn(run(actor, rx, shutdown, Arc::clone(&actor_id)));
    debug!(actor_id = %actor_id, mailbox_size, "Spawned actor");

    (ActorHandle { tx, actor_id }, task)
}

async fn run<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    actor_id: Arc<str>,
) {
    if let Err(e) = actor.started().await {
        error!(actor_id = %actor_id, error = %e, "Actor failed to start");
        return;
    }

    let mut stats = MailboxStats::default();

    loop {
        let msg = tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(actor_id = %actor_id, "Shutdown signalled");
                    break;
                }
                continue;
            }

            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        stats.processed += 1;
        stats.last_message_at = Some(Instant::now());

        match actor.handle(msg).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(ActorError::Permanent(reason)) => {
                stats.failed += 1;
                error!(actor_id = %actor_id, %reason, "Actor failed");
                break;
            }
            Err(e) => {
                stats.failed += 1;
                warn!(actor_id = %actor_id, error = %e, "Message handling failed");
            }
        }
    }

    actor.stopped(&stats).await;
    info!(
        actor_id = %actor_id,
        processed = stats.processed,
        failed = stats.failed,
        "Actor stopped"
    );
}
