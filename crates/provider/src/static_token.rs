//! Fixed token source for manual runs and tests.

use crate::TokenSource;
use tracing::debug;

/// Token source that always returns the same value.
///
/// Used when the operator pastes a token instead of letting the browser
/// provider fetch one. An empty string counts as "no token".
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        debug!(len = token.len(), "using static token");
        Self { token }
    }
}

impl TokenSource for StaticToken {
    fn get(&self) -> Option<String> {
        if self.token.is_empty() {
            None
        } else {
            Some(self.token.clone())
        }
    }
}
