//! Periodic announcements.
//!
//! A ready node announces itself on `{service}.announce` at startup and then
//! once per interval so the Provisioner's cache stays fresh without a
//! discovery round.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::actors::{ActorError, ActorHandle, NodeMessage};

/// Run the announce loop until shutdown or until the node stops.
pub(crate) async fn run_announce_loop(
    actor: ActorHandle<NodeMessage>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        actor_id = %actor.actor_id(),
        interval_secs = interval.as_secs_f64(),
        "Starting announce loop"
    );

    let mut timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                // A node with a backlog skips the tick; the next one catches up.
                match actor.try_send(NodeMessage::Announce) {
                    Ok(()) => {}
                    Err(ActorError::MailboxFull) => debug!("Mailbox full, skipping announcement"),
                    Err(_) => {
                        debug!("Node stopped, ending announce loop");
                        break;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Announce loop shutting down");
                    break;
                }
            }
        }
    }
}
