//! Error types for the audit trail

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Chain integrity breach at entry {index}")]
    IntegrityBreach { index: usize },

    #[error("Invalid audit action: {0}")]
    InvalidAction(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Serialization(err.to_string())
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
