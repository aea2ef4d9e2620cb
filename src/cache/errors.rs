//! Cache store error types
//!
//! Only persistent adapters produce these. Addressing a missing key is
//! never an error.

/// Storage-layer fault in a cache adapter
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cached metadata could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt cache row for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
