#![forbid(unsafe_code)]

//! Error surface shared by every module.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors surfaced by the watchable-graph API.
///
/// Everything here is a caller mistake or an explicit refusal; internal
/// mutation machinery never fails on its own, and batch mutators restore
/// their pre-mutation snapshot before returning any error.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("scalar values are not watchable")]
    ScalarNotWatchable,

    #[error("don't know how to watch this value")]
    CannotWatch,

    #[error("node is not a record")]
    NotARecord,

    #[error("node is not a sequence")]
    NotASequence,

    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("extension `{name}` is already registered")]
    DuplicateExtension { name: String },

    #[error("unknown extension `{name}`")]
    UnknownExtension { name: String },

    #[error("sequence mutation failed: {reason}")]
    MutationFailed { reason: String },
}

impl WatchError {
    /// Convenience constructor for advice and reorder procedures that need
    /// to abort a batch mutation with a message.
    #[must_use]
    pub fn mutation(reason: impl Into<String>) -> Self {
        Self::MutationFailed {
            reason: reason.into(),
        }
    }
}
