use thiserror::Error;

/// Why a string is not a valid id of the requested kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Empty, or no `_` between prefix and ULID.
    #[error("malformed id {0:?}, expected <prefix>_<ulid>")]
    Malformed(String),

    /// Well-formed, but for another kind of resource.
    #[error("id {input:?} is not a {expected} id")]
    WrongKind {
        expected: &'static str,
        input: String,
    },

    #[error("id {input:?} carries an invalid ULID: {reason}")]
    BadUlid { input: String, reason: String },
}

/// Strip `prefix_` from `input` and decode the rest as a ULID.
pub fn decode_prefixed(input: &str, prefix: &'static str) -> Result<ulid::Ulid, IdError> {
    let (found, encoded) = input
        .split_once('_')
        .filter(|(found, _)| !found.is_empty())
        .ok_or_else(|| IdError::Malformed(input.to_string()))?;

    if found != prefix {
        return Err(IdError::WrongKind {
            expected: prefix,
            input: input.to_string(),
        });
    }

    ulid::Ulid::from_string(encoded).map_err(|e| IdError::BadUlid {
        input: input.to_string(),
        reason: e.to_string(),
    })
}
