//! # svcb-proto
//!
//! Wire protocol between the Provisioner and its Nodes.
//!
//! ## Envelopes
//!
//! Every request is a [`RequestEnvelope`]: a correlation id plus one
//! [`Operation`]. Every reply is a [`ReplyEnvelope`] echoing the correlation
//! id, naming the replying node and its capacity *after* the operation, and
//! carrying either a [`ReplyBody`] or a [`ReplyError`].
//!
//! Node-side faults are never transport failures: they travel as a
//! `ReplyError` whose description starts with `"Service unavailable"`.
//!
//! ## Subjects
//!
//! See [`Subjects`] for the addressing scheme.

mod codec;
mod error;
mod reply;
mod request;
mod subjects;

pub use codec::{decode, encode};
pub use error::ProtoError;
pub use reply::*;
pub use request::*;
pub use subjects::{Subjects, DEFAULT_SERVICE};
