//! Error types for iris-core

use thiserror::Error;

/// Main error type for the iris-core library
///
/// None of these ever reach host code: boundary calls go through
/// [`crate::guard`], which absorbs them.
#[derive(Error, Debug)]
pub enum Error {
    /// Persisted storage could not be read or written
    #[error("storage error: {0}")]
    Storage(String),

    /// Delivery to the collection endpoint failed
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// URL could not be parsed
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// `track` was called without an event name
    #[error("event name is required")]
    MissingEventName,

    /// A boundary call panicked
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Result type alias for iris-core
pub type Result<T> = std::result::Result<T, Error>;
