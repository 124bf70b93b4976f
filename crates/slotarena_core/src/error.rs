//! # Arena Error Types
//!
//! All errors that can occur while building or operating a structure inside an arena.

use thiserror::Error;

/// Errors returned by every arena structure.
///
/// Every operation is fallible and hands its error straight back to the caller.
/// Nothing retries or recovers internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// A size or count argument is zero or structurally invalid.
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),

    /// The supplied buffer is shorter than the structure needs.
    #[error("buffer too small: need {required} bytes, got {actual}")]
    BufferTooSmall {
        /// Bytes required by `size_for`.
        required: usize,
        /// Bytes actually supplied.
        actual: usize,
    },

    /// The buffer is empty or does not hold an initialized structure.
    #[error("arena not initialized")]
    NotInitialized,

    /// No free slot, item or node is left.
    #[error("arena capacity exhausted")]
    OutOfCapacity,

    /// A handle or slot index does not refer to a live element.
    #[error("invalid handle: {0}")]
    InvalidHandle(u32),

    /// A position lies outside the list.
    #[error("position {position} out of range for length {length}")]
    OutOfRange {
        /// Requested position.
        position: u32,
        /// Current list length.
        length: u32,
    },

    /// The key is already present where keys must be unique.
    #[error("duplicate key")]
    DuplicateKey,

    /// No element matches the key.
    #[error("key not found")]
    KeyNotFound,

    /// An invariant does not hold. The arena is corrupt.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(&'static str),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ArenaError {
    /// Builds an [`ArenaError::InternalInconsistency`] and logs it.
    ///
    /// Corruption is never silent, so every construction goes through here.
    #[cold]
    pub(crate) fn corrupt(what: &'static str) -> Self {
        tracing::error!(what, "arena corruption detected");
        Self::InternalInconsistency(what)
    }
}

/// Result type for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;
