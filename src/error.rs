//! Error types for bucketsync

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for bucketsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for bucketsync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid credentials for provider '{provider}': missing {}", .missing.join(", "))]
    Credential {
        provider: String,
        missing: Vec<String>,
    },

    #[error("Failed to list buckets on '{provider}': {message}")]
    List { provider: String, message: String },

    #[error("Failed to create bucket '{bucket}' on '{provider}': {message}")]
    Creation {
        provider: String,
        bucket: String,
        message: String,
    },

    #[error("Transfer of bucket '{bucket}' failed: {message}")]
    Transfer { bucket: String, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a failure, attached to outcomes and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Credential,
    List,
    Creation,
    Transfer,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Credential => "credential",
            ErrorKind::List => "list",
            ErrorKind::Creation => "creation",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Configuration(_) | SyncError::Toml(_) => ErrorKind::Configuration,
            SyncError::Credential { .. } => ErrorKind::Credential,
            SyncError::List { .. } => ErrorKind::List,
            SyncError::Creation { .. } => ErrorKind::Creation,
            SyncError::Transfer { .. } => ErrorKind::Transfer,
            SyncError::Timeout(_) => ErrorKind::Timeout,
            SyncError::Serialization(_) | SyncError::Io(_) | SyncError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if error is retryable.
    ///
    /// Nothing in this crate retries; the flag is surfaced for schedulers
    /// that wrap a run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::List { .. }
                | SyncError::Creation { .. }
                | SyncError::Transfer { .. }
                | SyncError::Timeout(_)
        )
    }

    /// Whether the error must abort the whole run before any pair starts
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Configuration(_) | SyncError::Toml(_))
    }
}
