//! # svcb-bus
//!
//! The transport seam between the Provisioner and its Nodes.
//!
//! The broker only needs three things from a message bus:
//!
//! - `publish(subject, payload)`: fire-and-forget broadcast
//! - `subscribe(subject)`: a stream of messages published to a subject
//! - `request(subject, payload, window)`: publish with a private reply
//!   subject and collect zero or more replies until the window closes
//!
//! Delivery is at-most-once and unordered across publishers. [`MemoryBus`]
//! implements the contract inside one process and is what the tests and the
//! dev binary run on.

mod error;
mod memory;
mod transport;

pub use error::BusError;
pub use memory::{MemoryBus, DEFAULT_MAILBOX_SIZE};
pub use transport::{Message, Replies, Subscription, Transport, INBOX_PREFIX};
