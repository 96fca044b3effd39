//! Actor runtime and the node actor.
//!
//! A node's capacity counter and inventory tables are owned by exactly one
//! actor. Bus subscriptions, the announcement timer, and status probes all
//! talk to it through its mailbox, so requests are handled one at a time and
//! capacity mutations never race.

mod framework;
mod node;

pub use framework::{spawn_actor, Actor, ActorError, ActorHandle, Flow, MailboxStats};
pub use node::{HandlerCounters, NodeActor, NodeMessage, NodeSnapshot};
