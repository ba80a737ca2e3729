//! Error types for the action-outcome memory store.

use thiserror::Error;

/// Errors that can occur in the memory persistence layer.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("database query failed: {0}")]
    Query(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("schema setup failed: {0}")]
    SchemaSetup(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("ingest offset conflict for pack {pack_id}")]
    IngestOffsetConflict { pack_id: String },
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
