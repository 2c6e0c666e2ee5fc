//! Error types for the parcels aggregator
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for aggregator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the parcels aggregator
#[derive(Error, Debug)]
pub enum Error {
    /// Tracking source errors (construction, misconfiguration)
    #[error("Tracking source error ({source_name}): {message}")]
    Source {
        /// Source name
        source_name: String,
        /// Error message
        message: String,
    },

    /// A raw response could not be turned into tracking info
    #[error("Parse error ({source_name}): {message}")]
    Parse {
        /// Source name
        source_name: String,
        /// Error message
        message: String,
    },

    /// History store errors
    #[error("History store error: {0}")]
    HistoryStore(String),

    /// Reading history for a lookup failed
    #[error("Failed to {operation} for tracking number {tracking_number}: {source}")]
    HistoryRead {
        /// Tracking number being looked up
        tracking_number: String,
        /// Operation that failed
        operation: &'static str,
        /// Underlying store error
        #[source]
        source: Box<Error>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a tracking source error
    pub fn source_error(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a history store error
    pub fn history_store(msg: impl Into<String>) -> Self {
        Self::HistoryStore(msg.into())
    }

    /// Wrap a history read failure with lookup context
    pub fn history_read(
        tracking_number: impl Into<String>,
        operation: &'static str,
        source: Error,
    ) -> Self {
        Self::HistoryRead {
            tracking_number: tracking_number.into(),
            operation,
            source: Box::new(source),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
