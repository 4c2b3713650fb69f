//! Error types for the dose_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dose_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Application config file could not be validated or written
    #[error("Config error: {0}")]
    Config(String),

    /// A dosing schedule that cannot be evaluated (e.g. a zero-hour interval)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backing store could not be read or written; safe to retry
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Profile or medication lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap any IO-ish failure of a persistence collaborator.
    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Error::StorageUnavailable(format!("{}: {}", context, err))
    }

    /// True for failures callers may retry without risk.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_))
    }
}
