//! Custom error types for codesift
//!
//! Uses thiserror for ergonomic error definitions with automatic
//! Display and Error trait implementations.

use std::path::PathBuf;
use thiserror::Error;

/// Application-specific errors for codesift
#[derive(Error, Debug)]
pub enum SiftError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding provider failed to load or embed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Relevance judge failed or answered with something unusable
    #[error("Rerank error: {0}")]
    Rerank(String),

    /// Vector index operations failed
    #[error("Index error: {0}")]
    Index(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON parsing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport to a remote provider failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ignore rules could not be compiled
    #[error("Ignore rule error: {0}")]
    Ignore(#[from] ignore::Error),

    /// The project root handed to `open` does not exist
    #[error("The path '{}' does not exist.", .0.display())]
    MissingRoot(PathBuf),

    /// Key-value store rejected a key or failed
    #[error("Store error: {0}")]
    Store(String),

    /// File watcher errors
    #[error("Watch error: {0}")]
    Watch(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task panicked or was aborted
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SiftError>;
