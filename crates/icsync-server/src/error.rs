//! Server error types.

use std::io;

use icsync_providers::SyncError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync engine.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (database file, backup file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error from the async SQLite connection.
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    /// Error from SQLite itself.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Fetch, parse or calendar store failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A subscription id that does not exist.
    #[error("Subscription {id} not found")]
    SubscriptionNotFound { id: i64 },

    /// A backup document that cannot be restored.
    #[error("Invalid backup: {message}")]
    InvalidBackup { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a subscription not found error.
    pub fn subscription_not_found(id: i64) -> Self {
        Self::SubscriptionNotFound { id }
    }

    /// Creates an invalid backup error.
    pub fn invalid_backup(message: impl Into<String>) -> Self {
        Self::InvalidBackup {
            message: message.into(),
        }
    }

    /// Returns true if a later pass may succeed without user action.
    ///
    /// Local database and IO failures count as transient storage trouble.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Database(_) | Self::Sqlite(_) => true,
            Self::Sync(e) => e.is_retryable(),
            _ => false,
        }
    }
}
