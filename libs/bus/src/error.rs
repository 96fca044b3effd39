//! Transport errors.

use thiserror::Error;

/// Errors surfaced by a [`Transport`](crate::Transport).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus has been shut down.
    #[error("bus closed")]
    Closed,

    /// The subject is empty or contains whitespace.
    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),
}
