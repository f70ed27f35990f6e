//! Error types for the sync engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote rejected write: {0}")]
    RemoteConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Audit error: {0}")]
    Audit(#[from] audit_trail::AuditError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl SyncError {
    /// Whether this error is transient and the write should stay queued
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
