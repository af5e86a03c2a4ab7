//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Malformed call arguments (empty key, negative TTL, ...)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The user-supplied producer failed or panicked
    #[error("Source function failed for key '{key}': {source}")]
    SourceFunction {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid listener selection when clearing subscriptions
    #[error("Invalid listener configuration: {0}")]
    ListenerConfig(String),

    /// An awaited event handler returned an error
    #[error("Event handler failed: {0}")]
    EventHandler(#[source] anyhow::Error),

    /// JSON encoding or decoding of a cached value failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Builds a `SourceFunction` error for `key`.
    pub fn source_function(key: impl Into<String>, source: anyhow::Error) -> Self {
        CacheError::SourceFunction {
            key: key.into(),
            source,
        }
    }

    /// Key the error originated from, if it is tied to one.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheError::SourceFunction { key, .. } => Some(key),
            _ => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
