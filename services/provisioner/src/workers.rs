//! Background workers.
//!
//! - reply dispatcher: routes replies from the private inbox to waiters
//! - announcement listener: merges unsolicited announcements
//! - prune loop: drops nodes that have gone quiet

use std::sync::Arc;
use std::time::Duration;

use svcb_bus::Subscription;
use svcb_proto::{decode, Announcement, ReplyEnvelope};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::Shared;

fn should_stop(changed: Result<(), watch::error::RecvError>, shutdown: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *shutdown.borrow()
}

pub(crate) async fn run_reply_dispatcher(
    mut inbox: Subscription,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(inbox = %inbox.subject(), "Starting reply dispatcher");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if should_stop(changed, &shutdown) {
                    break;
                }
            }
            msg = inbox.next() => {
                let Some(msg) = msg else { break };
                let reply: ReplyEnvelope = match decode(&msg.payload) {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable reply");
                        continue;
                    }
                };
                let correlation_id = reply.correlation_id;
                if !shared.pending.resolve(reply).await {
                    debug!(correlation_id = %correlation_id, "Dropping late or unknown reply");
                }
            }
        }
    }

    debug!("Reply dispatcher stopped");
}

pub(crate) async fn run_announcement_listener(
    mut announcements: Subscription,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if should_stop(changed, &shutdown) {
                    break;
                }
            }
            msg = announcements.next() => {
                let Some(msg) = msg else { break };
                match decode::<Announcement>(&msg.payload) {
                    Ok(announcement) => {
                        shared
                            .cache
                            .write()
                            .await
                            .merge_announcement(&announcement, Instant::now());
                    }
                    Err(e) => warn!(error = %e, "Dropping undecodable announcement"),
                }
            }
        }
    }

    debug!("Announcement listener stopped");
}

pub(crate) async fn run_prune_loop(
    shared: Arc<Shared>,
    interval: Duration,
    node_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.as_secs(),
        node_timeout_secs = node_timeout.as_secs(),
        "Starting prune loop"
    );

    let mut timer = tokio::time::interval(interval);
    // The first tick completes immediately; nothing can be stale yet.
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let pruned = shared
                    .cache
                    .write()
                    .await
                    .prune_stale(Instant::now(), node_timeout);
                for node_id in pruned {
                    info!(node_id = %node_id, "Pruned silent node");
                }
            }
            changed = shutdown.changed() => {
                if should_stop(changed, &shutdown) {
                    info!("Prune loop shutting down");
                    break;
                }
            }
        }
    }
}
