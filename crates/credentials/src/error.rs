use std::time::Duration;

/// Errors from the credential refresher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Provider(#[from] provider::ProviderError),

    #[error("session provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("session is alive but no token was observed")]
    NoToken,

    #[error("refresher already started")]
    AlreadyStarted,
}

/// Result alias for refresher operations.
pub type Result<T> = std::result::Result<T, Error>;
