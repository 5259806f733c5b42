//! Error types for keypool

use thiserror::Error;

/// Core error type for keypool operations
#[derive(Error, Debug)]
pub enum KeypoolError {
    #[error("Factory failure for '{key}': {message}")]
    Factory { key: String, message: String },

    #[error("Pool exhausted: {0}")]
    Exhausted(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid owner: {0}")]
    InvalidOwner(String),

    #[error("Closed: {0}")]
    Closed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl KeypoolError {
    /// Build a factory failure for the given key.
    pub fn factory(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Factory {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Wrap an error raised by a factory so that borrowers always see a
    /// `Factory` variant, whatever the factory returned.
    pub fn into_factory(self, key: &str) -> Self {
        match self {
            err @ Self::Factory { .. } => err,
            other => Self::factory(key, other.to_string()),
        }
    }

    /// Whether a caller may reasonably retry the operation after a backoff.
    ///
    /// Only capacity failures are retryable; a factory failure should be
    /// surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted(_) | Self::Timeout(_))
    }

    /// Whether the error came from the handle factory.
    pub fn is_factory_failure(&self) -> bool {
        matches!(self, Self::Factory { .. })
    }
}

/// Result type alias for keypool operations
pub type Result<T> = std::result::Result<T, KeypoolError>;
