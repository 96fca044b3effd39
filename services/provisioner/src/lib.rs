//! Service broker provisioner.
//!
//! The provisioner keeps a soft-state view of the fleet and routes client
//! lifecycle operations to nodes:
//!
//! - **Discovery**: plan-scoped broadcasts plus unsolicited announcements
//!   fill a cache of node records (capacity, readiness, last announcement).
//! - **Routing**: requests for a plan go to the cached node with the most
//!   free capacity; instance-scoped requests go to the instance's owner.
//! - **Correlation**: replies come back on one private inbox and are matched
//!   to their waiters by correlation id; a request that times out is
//!   resolved once and any late reply is dropped.
//! - **Orphans**: a check broadcast refreshes per-node inventories, and a
//!   purge removes reported ids nobody recorded.
//!
//! Every failure a client sees reads "Service unavailable".

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod handles;
pub mod pending;
pub mod status;

mod workers;

pub use broker::{OrphanCheck, Provisioner, ProvisionerVarz, PurgeSelection, PurgeSummary};
pub use cache::{NodeCache, NodeRecord, NodeView};
pub use config::ProvisionerConfig;
pub use error::{BrokerError, BrokerResult};
