//! Error types for blockwatch-sync

use std::time::Duration;
use thiserror::Error;

use crate::BlockId;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Indexer API error: {0}")]
    Indexer(String),

    #[error("Feed transport error: {0}")]
    Transport(String),

    #[error("Feed read timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("Feed message decode error: {0}")]
    Decode(String),

    #[error("Chain discontinuity: block {got} does not extend {expected}")]
    Continuity { expected: BlockId, got: BlockId },

    #[error("Provider {name} failed at height {height}: {message}")]
    Provider {
        name: String,
        height: i64,
        message: String,
    },

    #[error("Provider {name} failed to initialize: {message}")]
    ProviderInit { name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether tearing down the current stream and reconnecting can clear this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::Config(_) | SyncError::ProviderInit { .. } | SyncError::Generic(_)
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
