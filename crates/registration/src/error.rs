//! Error types for registration response handling

/// Errors from decoding course API payloads.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed course response: {0}")]
    MalformedResponse(String),
}

/// Result alias for registration operations.
pub type Result<T> = std::result::Result<T, Error>;
