use serde::{Deserialize, Serialize};
use svcb_proto::OperationKind;
use thiserror::Error;

/// Capacity errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// No free slot left to consume.
    #[error("capacity exhausted")]
    Exhausted,

    /// Observed capacity change does not match the accounting rule.
    #[error("{kind} moved capacity {before} -> {after}, expected {expected}")]
    InvariantViolated {
        kind: OperationKind,
        before: u32,
        after: u32,
        expected: u32,
    },
}

/// Effect of an operation on capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityDelta {
    /// One slot is consumed.
    Consume,
    /// One slot is given back.
    Release,
    /// No change.
    Neutral,
}

impl CapacityDelta {
    /// Delta applied by a *successful* operation of `kind`.
    ///
    /// `update` doubles as the migration primitive and consumes a slot that
    /// is never given back. `unprovision` releases exactly one slot, so an
    /// instance that was updated leaves the node one slot short.
    pub fn for_op(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Provision | OperationKind::Update => CapacityDelta::Consume,
            OperationKind::Unprovision => CapacityDelta::Release,
            _ => CapacityDelta::Neutral,
        }
    }
}

/// Free provisioning slots on a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capacity(u32);

impl Capacity {
    pub const fn new(slots: u32) -> Self {
        Self(slots)
    }

    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Whether at least one slot is free.
    pub const fn is_available(&self) -> bool {
        self.0 > 0
    }

    /// Take one slot.
    pub fn reserve(&mut self) -> Result<(), CapacityError> {
        self.0 = self.0.checked_sub(1).ok_or(CapacityError::Exhausted)?;
        Ok(())
    }

    /// Give one slot back.
    pub fn release(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    /// Apply `delta`. On error the capacity is unchanged.
    pub fn apply(&mut self, delta: CapacityDelta) -> Result<(), CapacityError> {
        match delta {
            CapacityDelta::Consume => self.reserve(),
            CapacityDelta::Release => {
                self.release();
                Ok(())
            }
            CapacityDelta::Neutral => Ok(()),
        }
    }

    /// Capacity after `delta`, without mutating.
    pub fn after(self, delta: CapacityDelta) -> Result<Self, CapacityError> {
        let mut next = self;
        next.apply(delta)?;
        Ok(next)
    }
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Capacity {
    fn from(slots: u32) -> Self {
        Self(slots)
    }
}

impl From<Capacity> for u32 {
    fn from(capacity: Capacity) -> Self {
        capacity.0
    }
}

/// Check an observed capacity change against the accounting rule.
///
/// A failed operation must leave capacity untouched.
pub fn verify(
    kind: OperationKind,
    before: Capacity,
    after: Capacity,
    succeeded: bool,
) -> Result<(), CapacityError> {
    let expected = if succeeded {
        before.after(CapacityDelta::for_op(kind))?
    } else {
        before
    };

    if after != expected {
        return Err(CapacityError::InvariantViolated {
            kind,
            before: before.get(),
            after: after.get(),
            expected: expected.get(),
        });
    }
    Ok(())
}
