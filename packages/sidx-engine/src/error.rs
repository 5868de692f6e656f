//! Error types for the index engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Key too long ({len} bytes, max {max}) for index {index}")]
    KeyTooLong { index: String, len: usize, max: usize },

    #[error("Duplicate key in index {index}: {key}")]
    DuplicateKey { index: String, key: String },

    /// The exact `(key, record id)` entry is already present.
    #[error("Duplicate key value in index {index}: {key} for record {rid}")]
    DuplicateKeyValue { index: String, key: String, rid: u64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Store-level invariant violation. Only the single-key removal path
    /// absorbs this; everywhere else it is fatal to the call.
    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Write conflict")]
    WriteConflict,

    #[error("Operation interrupted")]
    Interrupted,

    #[error("Key extraction failed: {0}")]
    KeyExtraction(String),

    #[error("Invalid index spec: {0}")]
    InvalidSpec(String),

    #[error("Sort exceeded memory limit of {limit} bytes and external sort is disabled")]
    SortMemoryExceeded { limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),
}

impl IndexError {
    /// Stable error code for callers that classify outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::KeyTooLong { .. } => "KEY_TOO_LONG",
            IndexError::DuplicateKey { .. } => "DUPLICATE_KEY",
            IndexError::DuplicateKeyValue { .. } => "DUPLICATE_KEY_VALUE",
            IndexError::InvalidState(_) => "INVALID_STATE",
            IndexError::Corruption(_) => "CORRUPTION",
            IndexError::WriteConflict => "WRITE_CONFLICT",
            IndexError::Interrupted => "INTERRUPTED",
            IndexError::KeyExtraction(_) => "KEY_EXTRACTION",
            IndexError::InvalidSpec(_) => "INVALID_SPEC",
            IndexError::SortMemoryExceeded { .. } => "SORT_MEMORY_EXCEEDED",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn is_key_too_long(&self) -> bool {
        matches!(self, IndexError::KeyTooLong { .. })
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, IndexError::DuplicateKey { .. })
    }

    pub fn is_duplicate_key_value(&self) -> bool {
        matches!(self, IndexError::DuplicateKeyValue { .. })
    }

    pub fn is_write_conflict(&self) -> bool {
        matches!(self, IndexError::WriteConflict)
    }
}
