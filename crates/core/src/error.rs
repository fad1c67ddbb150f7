//! Error type shared by the online index, the bulk builder and persistence.

use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HnswError>;

/// All failures surfaced by the index.
///
/// Distance anomalies (NaN or infinite distances) are never reported here;
/// such candidates are dropped during search and construction.
#[derive(Debug, Error)]
pub enum HnswError {
    /// Caller-supplied input was rejected before any state was mutated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The object is in a state that does not permit the requested operation.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Reading or writing a persisted index failed, including format errors.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A persisted index references a space type that could not be resolved.
    #[error("unknown space type: {0}")]
    UnknownSpace(String),

    /// A bulk build worker failed; the partially built graph was discarded.
    #[error("bulk build failed: {0}")]
    BuildFailed(String),
}

impl HnswError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::InvalidArgument(format!(
            "dimension mismatch: expected {expected}, got {actual}"
        ))
    }
}
