//! Collaborator interfaces for credential acquisition
//!
//! Defines the two seams the registration core depends on without knowing how
//! they are implemented:
//! - `SessionProvider` establishes a logged-in session and extracts a bearer
//!   token from it (a browser in production, a fake in tests)
//! - `TokenSource` hands the current token to whoever sends requests. A fixed
//!   token is a `StaticToken`; a live one is the credential refresher.

pub mod static_token;

pub use static_token::StaticToken;

use common::Secret;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

/// Login name and password used to establish a session.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: Secret<String>,
}

/// Opaque handle to an established session.
///
/// The provider owns the underlying session state; the handle only lets the
/// caller tell sessions apart (e.g. to log that a re-login happened).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    id: u64,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionHandle {
    /// Allocate a fresh handle. Provider implementations call this on every
    /// successful `establish_session`.
    pub fn next() -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Errors from session providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider's session degraded (e.g. redirected back to the login
    /// page). The caller should establish a new session and retry.
    #[error("session lost: {0}")]
    SessionLost(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Credential Session Provider.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn SessionProvider>`).
pub trait SessionProvider: Send + Sync {
    /// Identifier for logging (e.g. "browser", "fake")
    fn id(&self) -> &str;

    /// Log in with the given credentials and return a handle to the session.
    fn establish_session<'a>(
        &'a self,
        credentials: &'a LoginCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<SessionHandle>> + Send + 'a>>;

    /// Obtain the current bearer token from an established session.
    ///
    /// `Ok(None)` means the session is alive but no token was observed this
    /// time. `Err(SessionLost)` means the session must be re-established.
    fn fetch_token<'a>(
        &'a self,
        session: &'a SessionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;
}

/// Capability to read the bearer token to attach to the next request.
///
/// Returns `None` when no token has been obtained yet.
pub trait TokenSource: Send + Sync {
    fn get(&self) -> Option<String>;
}

impl<T: TokenSource + ?Sized> TokenSource for std::sync::Arc<T> {
    fn get(&self) -> Option<String> {
        (**self).get()
    }
}
