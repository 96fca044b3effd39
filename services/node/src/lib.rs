//! Service broker node.
//!
//! A node hosts backing-service instances of a single plan. It answers
//! discovery broadcasts when ready, executes lifecycle operations addressed
//! to its id, and reports its full inventory for orphan checks.
//!
//! ## Architecture
//!
//! ```text
//! bus subscriptions ──┐
//! announce timer ─────┼──▶ NodeActor (capacity, instances, bindings)
//! status probes ──────┘            │
//!                                  └──▶ ServiceBackend
//! ```
//!
//! All local state lives inside one actor, so requests are handled strictly
//! one at a time and capacity updates are serialized.
//!
//! ## Modules
//!
//! - `actors`: Actor framework and the node actor
//! - `backend`: The backing resource abstraction
//! - `handle`: Startup, subscriptions, and the handle used to drive a node
//! - `status`: `/varz` and `/healthz` probes

pub mod actors;
pub mod backend;
pub mod config;
pub mod error;
pub mod handle;
pub mod status;

mod announce;

pub use actors::{HandlerCounters, NodeSnapshot};
pub use backend::{MemoryBackend, ServiceBackend};
pub use config::NodeConfig;
pub use error::NodeError;
pub use handle::{start, NodeClient, NodeHandle};
