//! Application-wide error types.

use qf_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Log decode error: {0}")]
    EventParse(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Quote error: {0}")]
    Quote(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IndexerError {
    /// Network-side failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Rpc(_) | Self::Quote(_))
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;
