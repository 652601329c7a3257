use thiserror::Error;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {collection}/{local_id}")]
    NotFound { collection: String, local_id: i64 },

    #[error("Storage corruption in {collection}/{local_id}: failed to parse \"{field}\" column")]
    Corruption {
        collection: String,
        local_id: i64,
        field: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Storage not initialized. Call initialize() first.")]
    NotInitialized,

    #[error("Transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// ProteeError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProteeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sync orchestrator disposed")]
    Disposed,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias — the default error type is `ProteeError`.
pub type Result<T, E = ProteeError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
