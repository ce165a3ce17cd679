//! Browser-backed session provider
//!
//! Drives a visible Chrome window through the login flow and reads the bearer
//! token off the page's own API traffic: the target page calls the token URL
//! on load, and the `Authorization` header of that request is the token.
//!
//! Landing on the login host at any point means the session is gone.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use provider::{LoginCredentials, ProviderError, SessionHandle, SessionProvider};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Pause between filling login inputs.
const INPUT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub target_url: String,
    pub token_url: String,
    pub login_host: String,
    pub page_load_delay: Duration,
    /// Chrome binary; autodetected when unset.
    pub executable: Option<PathBuf>,
}

impl BrowserSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_url: config.endpoints.target_url.clone(),
            token_url: config.endpoints.token_url.clone(),
            login_host: config.endpoints.login_host.clone(),
            page_load_delay: config.timing.page_load_delay(),
            executable: std::env::var_os("CHROME_PATH").map(PathBuf::from),
        }
    }
}

struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    handle: SessionHandle,
}

/// `SessionProvider` backed by a Chrome instance over CDP.
pub struct BrowserSessionProvider {
    settings: BrowserSettings,
    session: Mutex<Option<BrowserSession>>,
}

impl BrowserSessionProvider {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
        }
    }

    async fn launch(&self) -> Result<(Browser, Page, JoinHandle<()>)> {
        let mut builder = BrowserConfig::builder().with_head();
        if let Some(ref path) = self.settings.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(Error::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        Ok((browser, page, handler))
    }

    async fn on_login_host(&self, page: &Page) -> Result<bool> {
        let url = page.url().await?.unwrap_or_default();
        Ok(url.contains(&self.settings.login_host))
    }

    async fn open_target(&self, page: &Page) -> Result<()> {
        debug!(url = %self.settings.target_url, "opening target page");
        page.goto(self.settings.target_url.as_str()).await?;
        sleep(self.settings.page_load_delay).await;
        Ok(())
    }

    /// Fill every visible input in order: username, password, then click the
    /// remaining ones (the submit button).
    async fn fill_login_form(&self, page: &Page, credentials: &LoginCredentials) -> Result<()> {
        let values = [
            credentials.username.as_str(),
            credentials.password.expose().as_str(),
        ];
        let mut index = 0;
        for element in page.find_elements("input").await? {
            if element.attribute("type").await?.as_deref() == Some("hidden") {
                continue;
            }
            element.click().await?;
            if let Some(value) = values.get(index) {
                element.type_str(*value).await?;
            }
            index += 1;
            sleep(INPUT_DELAY).await;
        }
        debug!(inputs = index, "login form filled");
        Ok(())
    }

    async fn log_in(&self, page: &Page, credentials: &LoginCredentials) -> Result<()> {
        self.open_target(page).await?;
        if !self.on_login_host(page).await? {
            info!("already logged in, skipping login form");
            return Ok(());
        }

        info!(user = %credentials.username, "logging in");
        self.fill_login_form(page, credentials).await?;
        sleep(self.settings.page_load_delay).await;
        self.open_target(page).await?;

        if self.on_login_host(page).await? {
            return Err(Error::Browser("still on the login page after submitting".into()));
        }
        Ok(())
    }

    async fn establish(&self, credentials: &LoginCredentials) -> Result<SessionHandle> {
        let mut session = self.session.lock().await;
        if session.is_none() {
            let (browser, page, handler) = self.launch().await?;
            *session = Some(BrowserSession {
                browser,
                page,
                handler,
                handle: SessionHandle::next(),
            });
        }
        let Some(current) = session.as_mut() else {
            return Err(Error::Browser("browser session missing".into()));
        };

        if let Err(e) = self.log_in(&current.page, credentials).await {
            if e.is_connection_lost() {
                warn!(error = %e, "browser connection lost, relaunching on next login");
                discard(&mut session);
            }
            return Err(e);
        }
        current.handle = SessionHandle::next();
        Ok(current.handle.clone())
    }

    /// Reload the target page and capture the token request's header.
    ///
    /// A dead browser is dropped and reported as a lost session so the next
    /// login launches a fresh one.
    async fn capture_token(&self, handle: &SessionHandle) -> std::result::Result<Option<String>, ProviderError> {
        let mut session = self.session.lock().await;
        let Some(current) = session.as_ref() else {
            return Err(ProviderError::SessionLost("browser not running".into()));
        };
        if current.handle != *handle {
            return Err(ProviderError::SessionLost("session was replaced".into()));
        }

        let outcome = self.reload_and_capture(&current.page).await;
        match outcome {
            Ok(Capture::Token(token)) => Ok(token),
            Ok(Capture::LoginPage) => Err(ProviderError::SessionLost("redirected to login page".into())),
            Err(e) if e.is_connection_lost() => {
                warn!(error = %e, "browser connection lost");
                discard(&mut session);
                Err(ProviderError::SessionLost(e.to_string()))
            }
            Err(e) => Err(ProviderError::Unavailable(e.to_string())),
        }
    }

    async fn reload_and_capture(&self, page: &Page) -> Result<Capture> {
        if self.on_login_host(page).await? {
            return Ok(Capture::LoginPage);
        }

        let url = page.url().await?.unwrap_or_default();
        if !url.contains(&self.settings.target_url) {
            self.open_target(page).await?;
        }

        let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
        page.reload().await?;

        let token_url = self.settings.token_url.as_str();
        let wait = async {
            while let Some(event) = requests.next().await {
                if !event.request.url.contains(token_url) {
                    continue;
                }
                if let Some(token) = authorization_header(&event.request.headers) {
                    return Some(token);
                }
            }
            None
        };

        let Ok(token) = tokio::time::timeout(self.settings.page_load_delay, wait).await else {
            if self.on_login_host(page).await? {
                return Ok(Capture::LoginPage);
            }
            debug!("no token request seen after reload");
            return Ok(Capture::Token(None));
        };
        Ok(Capture::Token(token))
    }

    /// Close the browser and stop its event handler.
    pub async fn close(&self) {
        let Some(mut current) = self.session.lock().await.take() else {
            return;
        };
        if let Err(e) = current.browser.close().await {
            warn!(error = %e, "failed to close browser");
        }
        current.handler.abort();
    }
}

enum Capture {
    Token(Option<String>),
    LoginPage,
}

/// Forget a session whose browser died.
fn discard(session: &mut Option<BrowserSession>) {
    if let Some(dead) = session.take() {
        dead.handler.abort();
    }
}

/// Header names are case-insensitive on the wire; CDP keeps the page's casing.
fn authorization_header<T: serde::Serialize>(headers: &T) -> Option<String> {
    let value = serde_json::to_value(headers).ok()?;
    value
        .as_object()?
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .and_then(|(_, v)| v.as_str())
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

impl SessionProvider for BrowserSessionProvider {
    fn id(&self) -> &str {
        "browser"
    }

    fn establish_session<'a>(
        &'a self,
        credentials: &'a LoginCredentials,
    ) -> Pin<Box<dyn Future<Output = provider::Result<SessionHandle>> + Send + 'a>> {
        Box::pin(async move {
            self.establish(credentials)
                .await
                .map_err(|e| ProviderError::Login(e.to_string()))
        })
    }

    fn fetch_token<'a>(
        &'a self,
        session: &'a SessionHandle,
    ) -> Pin<Box<dyn Future<Output = provider::Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move { self.capture_token(session).await })
    }
}
