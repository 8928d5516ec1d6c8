//! Storage error handling
//!
//! Provides typed errors for storage operations with descriptive messages
//! and a transient/permanent classification the sync engine relies on.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be opened or reached
    #[error("Local storage unavailable at '{path}': {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored payload or headers could not be (de)serialized
    #[error("Invalid stored data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored column held a value that does not parse
    #[error("Corrupt row in '{table}': {details}")]
    CorruptRow { table: &'static str, details: String },

    /// The blocking task running a query panicked or was cancelled
    #[error("Storage worker failed: {0}")]
    Worker(String),
}

impl StoreError {
    /// Check if retrying the operation later may succeed
    ///
    /// Busy/locked databases and I/O failures are transient; malformed data
    /// is not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable { .. } | StoreError::CreateDirectory { .. } => true,
            StoreError::Database(err) => is_transient_sqlite(err),
            StoreError::Serialization(_)
            | StoreError::CorruptRow { .. }
            | StoreError::Worker(_) => false,
        }
    }
}

fn is_transient_sqlite(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;

    match err.sqlite_error_code() {
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::CannotOpen
            | ErrorCode::DiskFull
            | ErrorCode::OutOfMemory,
        ) => true,
        _ => false,
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
