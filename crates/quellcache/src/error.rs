//! Error types for quellcache

use crate::merge::ShapeMismatchError;
use crate::transport::TransportError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, QuellError>;

/// Ways a call can fail
///
/// Unmapped types never surface here: they downgrade the call to a
/// pass-through instead.
#[derive(Debug, thiserror::Error)]
pub enum QuellError {
    /// The transport failed or the endpoint rejected the request
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Fetched data does not match the remainder query that was sent
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),

    /// The store backend failed
    #[error("Store error: {0}")]
    Store(#[from] quellstore::Error),

    /// Bad configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
