//! Error types for transactional caches.

use crate::types::CacheId;
use thiserror::Error;

/// Main error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol misuse, e.g. mutating outside an active transaction.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The persisted update stream is truncated or malformed.
    #[error("Corrupt update log at offset {offset}: {reason}")]
    CorruptLog { offset: usize, reason: String },

    /// Failure reported by a save or load hook.
    #[error("Backing store error: {0}")]
    BackingStore(String),

    #[error("Argument too large: {len} elements (max {max})")]
    ArgumentTooLarge { len: usize, max: usize },

    #[error("Cache not registered: {0}")]
    CacheNotRegistered(CacheId),

    #[error("Cache already registered: {0}")]
    CacheExists(CacheId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Journal is locked by another process")]
    Locked,

    #[error("Journal not initialized")]
    NotInitialized,

    #[error("Invalid journal format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },
}

impl CacheError {
    /// Wrap a failure from an external backing store.
    pub fn backing_store(err: impl std::fmt::Display) -> Self {
        CacheError::BackingStore(err.to_string())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        CacheError::InvalidState(msg.into())
    }

    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        CacheError::CorruptLog {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
