//! Origin client error types.

use thiserror::Error;

/// Errors talking to an origin.
///
/// None of these are retried by the clients; the read path passes a status
/// through to its caller and the sweep counts the failure and moves on.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("origin request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("origin returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid origin response: {0}")]
    InvalidResponse(String),
}

/// Result type for origin operations.
pub type OriginResult<T> = std::result::Result<T, OriginError>;
