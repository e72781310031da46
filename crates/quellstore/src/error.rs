//! Error types for quellstore

use std::io;

/// Result type alias for quellstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record or log line could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store file is not a Quell store
    #[error("Parse error: {0}")]
    Parse(String),

    /// Store is closed
    #[error("Store is closed")]
    Closed,
}
