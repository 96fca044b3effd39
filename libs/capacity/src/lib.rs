//! Capacity accounting and derived inventory.
//!
//! The same rule decides routing on the Provisioner and bookkeeping on the
//! Node:
//!
//! - a successful `provision` or `update` consumes one slot
//! - a successful `unprovision` releases one slot
//! - every other operation, and every failed operation, leaves capacity alone
//!
//! The Node's [`Capacity`] is authoritative. The Provisioner only ever copies
//! the value a node reports; it never does the arithmetic itself.
//!
//! [`Inventory`] is the Provisioner's derived view of which instances and
//! bindings each node holds, refreshed wholesale by the orphan sweep.

mod capacity;
mod inventory;

pub use capacity::{verify, Capacity, CapacityDelta, CapacityError};
pub use inventory::{Inventory, OrphanSet};
