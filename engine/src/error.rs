//! Error types for the stash engine.

use crate::{ColumnName, RecordId, StashName};
use thiserror::Error;

/// All possible errors from the stash engine.
#[derive(Debug, Error)]
pub enum Error {
    // Validation errors
    #[error("invalid prefix '{prefix}': {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    #[error("invalid stash name '{0}'")]
    InvalidStashName(StashName),

    #[error("invalid column name '{name}': {reason}")]
    InvalidColumnName { name: ColumnName, reason: String },

    #[error("column name '{0}' is reserved")]
    ReservedColumnName(ColumnName),

    #[error("invalid record id '{0}'")]
    InvalidId(RecordId),

    #[error("invalid value for column '{column}': {reason}")]
    InvalidValue { column: ColumnName, reason: String },

    // Stash lifecycle errors
    #[error("stash already exists: {0}")]
    StashExists(StashName),

    #[error("stash not found: {0}")]
    StashNotFound(StashName),

    #[error("column already exists: {0}")]
    ColumnExists(ColumnName),

    #[error("column not found: {0}")]
    ColumnNotFound(ColumnName),

    // Record lifecycle errors
    #[error("record already exists: {0}")]
    RecordExists(RecordId),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("record is deleted: {0}")]
    RecordDeleted(RecordId),

    #[error("record already deleted: {0}")]
    RecordAlreadyDeleted(RecordId),

    #[error("record is not deleted: {0}")]
    NotDeleted(RecordId),

    #[error("record has active children: {0}")]
    HasChildren(RecordId),

    // Integrity errors
    #[error("hash mismatch for {id}: stored {stored}, computed {computed}")]
    HashMismatch {
        id: RecordId,
        stored: String,
        computed: String,
    },

    #[error("parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    // Underlying store errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Map this error to the process exit code contract used by callers
    /// that shell out: 1 for validation/user errors, 3 for a missing
    /// stash, 4 for a missing record.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::StashNotFound(_) => 3,
            Error::RecordNotFound(_) => 4,
            _ => 1,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
