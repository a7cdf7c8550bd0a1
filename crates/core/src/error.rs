//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown origin kind: {0}")]
    UnknownOriginKind(String),

    #[error("unknown size class: {0}")]
    UnknownSizeClass(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid cache key: {0}")]
    InvalidCacheKey(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
