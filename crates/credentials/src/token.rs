use common::Secret;
use tokio::time::{Duration, Instant};

/// Last token obtained from the session provider.
#[derive(Debug, Clone)]
pub struct TokenState {
    token: Secret<String>,
    obtained_at: Instant,
}

impl TokenState {
    pub fn new(token: String) -> Self {
        Self {
            token: Secret::new(token),
            obtained_at: Instant::now(),
        }
    }

    /// Raw header value to send with requests.
    pub fn token(&self) -> &str {
        self.token.expose()
    }

    /// Time since the token was captured.
    pub fn age(&self) -> Duration {
        self.obtained_at.elapsed()
    }
}
