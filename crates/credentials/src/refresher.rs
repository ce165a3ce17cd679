//! Periodic token refresh on top of a session provider
//!
//! State machine: `NotStarted → Running → Stopped`. While running, a spawned
//! task fetches a token every `interval`. The first successful fetch releases
//! anyone blocked in `wait_for_first_token`; later fetches replace the token in
//! place. On `SessionLost` the cycle logs in again and retries the fetch once.
//!
//! `stop()` is observed while the task sleeps between cycles. A provider call
//! already in flight is allowed to finish (bounded by `call_timeout`).

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use provider::{LoginCredentials, ProviderError, SessionHandle, SessionProvider, TokenSource};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::token::TokenState;

/// Default delay between refresh cycles.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on a single provider call (login or token fetch).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefresherState {
    NotStarted,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RefresherConfig {
    pub interval: Duration,
    pub call_timeout: Duration,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REFRESH_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Keeps a live bearer token obtained from a `SessionProvider`.
///
/// The token lives in a `watch` channel: the refresh task is the only writer,
/// readers borrow the current value without waiting.
pub struct CredentialRefresher {
    provider: Arc<dyn SessionProvider>,
    credentials: LoginCredentials,
    config: RefresherConfig,
    token: watch::Sender<Option<TokenState>>,
    state: watch::Sender<RefresherState>,
    session: tokio::sync::Mutex<Option<SessionHandle>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CredentialRefresher {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        credentials: LoginCredentials,
        config: RefresherConfig,
    ) -> Self {
        Self {
            provider,
            credentials,
            config,
            token: watch::Sender::new(None),
            state: watch::Sender::new(RefresherState::NotStarted),
            session: tokio::sync::Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RefresherState {
        *self.state.borrow()
    }

    /// Log in, then spawn the refresh task.
    ///
    /// The initial login runs on the caller's task so a bad password or a dead
    /// provider is reported here. On failure the refresher moves to `Stopped`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let started = self.state.send_if_modified(|state| {
            if *state == RefresherState::NotStarted {
                *state = RefresherState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(Error::AlreadyStarted);
        }

        info!(provider = self.provider.id(), "establishing session");
        if let Err(e) = self.establish().await {
            warn!(provider = self.provider.id(), error = %e, "initial session establishment failed");
            self.state.send_replace(RefresherState::Stopped);
            return Err(e);
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    async fn run(&self) {
        let mut cycle: u64 = 0;
        let mut state_rx = self.state.subscribe();
        loop {
            if *state_rx.borrow_and_update() == RefresherState::Stopped {
                break;
            }
            cycle += 1;
            if let Err(e) = self.refresh_once().await {
                warn!(cycle, error = %e, "token refresh failed, will retry next cycle");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = state_rx.wait_for(|s| *s == RefresherState::Stopped) => break,
            }
        }
        debug!(cycles = cycle, "refresh task exited");
    }

    /// Run one refresh cycle and publish the new token.
    ///
    /// On failure the previously published token is left untouched.
    pub async fn refresh_once(&self) -> Result<()> {
        let result = self.fetch_with_relogin().await;
        match &result {
            Ok(token) => {
                match self.token.send_replace(Some(TokenState::new(token.clone()))) {
                    None => info!("first token acquired"),
                    Some(previous) => debug!(
                        replaced_age_ms = previous.age().as_millis() as u64,
                        "token refreshed"
                    ),
                }
                metrics::counter!("token_refresh_total", "result" => "ok").increment(1);
            }
            Err(_) => {
                metrics::counter!("token_refresh_total", "result" => "error").increment(1);
            }
        }
        result.map(|_| ())
    }

    async fn fetch_with_relogin(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        let handle = match session.as_ref() {
            Some(handle) => handle.clone(),
            None => {
                let handle = self.login().await?;
                *session = Some(handle.clone());
                handle
            }
        };

        match self.fetch(&handle).await {
            Err(Error::Provider(ProviderError::SessionLost(reason))) => {
                warn!(session = handle.id(), reason = %reason, "session lost, logging in again");
                *session = None;
                let handle = self.login().await?;
                *session = Some(handle.clone());
                self.fetch(&handle).await
            }
            other => other,
        }
    }

    async fn establish(&self) -> Result<()> {
        let handle = self.login().await?;
        *self.session.lock().await = Some(handle);
        Ok(())
    }

    async fn login(&self) -> Result<SessionHandle> {
        let handle = self
            .bounded(self.provider.establish_session(&self.credentials))
            .await??;
        info!(session = handle.id(), user = %self.credentials.username, "session established");
        Ok(handle)
    }

    async fn fetch(&self, session: &SessionHandle) -> Result<String> {
        match self.bounded(self.provider.fetch_token(session)).await?? {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(Error::NoToken),
        }
    }

    async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::time::timeout(self.config.call_timeout, fut)
            .await
            .map_err(|_| Error::Timeout(self.config.call_timeout))
    }

    /// Last successfully obtained token, if any.
    pub fn get_token(&self) -> Option<String> {
        self.token.borrow().as_ref().map(|t| t.token().to_string())
    }

    /// Wait until the first token is published or `timeout` elapses.
    ///
    /// Returns early with `false` if the refresher stops without ever
    /// obtaining a token.
    pub async fn wait_for_first_token(&self, timeout: Duration) -> bool {
        let mut token_rx = self.token.subscribe();
        let mut state_rx = self.state.subscribe();
        let wait = async {
            tokio::select! {
                r = token_rx.wait_for(Option::is_some) => r.is_ok(),
                _ = state_rx.wait_for(|s| *s == RefresherState::Stopped) => {
                    self.token.borrow().is_some()
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Ask the refresh task to exit at its next sleep.
    pub fn stop(&self) {
        let previous = self.state.send_replace(RefresherState::Stopped);
        if previous != RefresherState::Stopped {
            info!("credential refresher stopping");
        }
    }

    /// Wait for the refresh task to exit. Call after `stop()`.
    pub async fn join(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "refresh task ended abnormally");
            }
        }
    }
}

impl TokenSource for CredentialRefresher {
    fn get(&self) -> Option<String> {
        self.get_token()
    }
}
