//! Service-specific error types

use std::time::Duration;
use thiserror::Error;

/// Course picker lifecycle and transport errors.
///
/// Rejections of individual CRNs never show up here; they are result codes
/// handled by the retry engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Endpoint returned status {0}")]
    Status(u16),

    #[error("No token obtained within {0:?}")]
    NoToken(Duration),

    #[error("Credential refresher failed: {0}")]
    Credentials(#[from] credentials::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("DevTools protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
}

impl Error {
    /// Whether the browser process or its websocket is gone, as opposed to a
    /// page-level failure the same browser can recover from.
    pub fn is_connection_lost(&self) -> bool {
        use chromiumoxide::error::CdpError;
        matches!(
            self,
            Error::Cdp(
                CdpError::Ws(_)
                    | CdpError::Io(_)
                    | CdpError::NoResponse
                    | CdpError::ChannelSendError(_)
                    | CdpError::Timeout
            )
        )
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
