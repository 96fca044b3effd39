//! Typed identifiers for the service broker.
//!
//! Every id is a ULID behind a short prefix naming what it identifies, for
//! example `node_01HV4Z2WQXKJNM8GPQY6VBKC3D` or `ins_01HV4Z3MXNKPQR9HSTZ7WCLD4E`.
//! A binding id therefore never parses as an instance id, and ids of one
//! kind sort by creation time.

mod error;
mod macros;
mod types;

#[doc(hidden)]
pub use error::decode_prefixed;
pub use error::IdError;
pub use types::*;
pub use ulid::Ulid;
