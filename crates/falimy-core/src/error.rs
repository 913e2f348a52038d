//! Error types for falimy-core

use thiserror::Error;

/// Result type alias using falimy-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in falimy-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found
    #[error("{collection} not found: {id}")]
    NotFound { collection: &'static str, id: String },

    /// Write references a parent row that does not exist
    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    /// Unknown collection or malformed query
    #[error("Schema error: {0}")]
    Schema(String),

    /// Remote payload could not be coerced into a typed record
    #[error("Invalid record in {collection}: {reason}")]
    InvalidRecord {
        collection: &'static str,
        reason: String,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Push or fetch network failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend refused a request (validation, permissions, missing record)
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Session token rejected by the backend
    #[error("Session expired; re-authentication required")]
    AuthExpired,
}

impl Error {
    /// Transport failures are retried by the next scheduled trigger.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Local programming or data errors that must not be retried.
    pub const fn is_local(&self) -> bool {
        matches!(
            self,
            Self::ReferentialIntegrity(_) | Self::Schema(_) | Self::InvalidInput(_)
        )
    }

    /// The backend has no record with the requested id.
    pub const fn is_remote_not_found(&self) -> bool {
        matches!(self, Self::Rejected { status: 404, .. })
    }

    pub(crate) fn not_found(collection: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            collection,
            id: id.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(reqwest::StatusCode::UNAUTHORIZED) => Self::AuthExpired,
            _ => Self::Transport(error.to_string()),
        }
    }
}
