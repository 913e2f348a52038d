use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] falimy_core::Error),
    #[error(transparent)]
    Auth(#[from] falimy_core::AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{0} not found for id/prefix: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Identifier cannot be empty")]
    EmptyId,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Not signed in. Run `falimy auth login` or `falimy auth join` first.")]
    NotSignedIn,
    #[error("Sync failed: {0}")]
    Sync(String),
    #[error("Session expired. Run `falimy auth login` again.")]
    SessionExpired,
    #[error(
        "No server configured. Run `falimy config init --server <URL>` or set FALIMY_SERVER_URL."
    )]
    ServerNotConfigured,
}
