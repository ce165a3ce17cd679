//! HTTP client for the course selection and time-check endpoints
//!
//! Both endpoints take the captured bearer token verbatim in the
//! `Authorization` header. The course response is returned as raw text; the
//! retry engine owns parsing so a broken body only costs one attempt.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use registration::{CourseRequest, WorkingLists};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::debug;

use crate::config::EndpointsConfig;
use crate::error::{Error, Result};

/// Course API as seen by the dispatch loop.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn RegistrationApi>`).
pub trait RegistrationApi: Send + Sync {
    /// Submit the current add/drop lists, returning the raw response body.
    fn submit<'a>(
        &'a self,
        token: &'a str,
        lists: &'a WorkingLists,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Whether the registration window is open for adding or dropping.
    fn registration_open<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

#[derive(Debug, Deserialize)]
struct TimeCheckResponse {
    #[serde(rename = "kayitZamanKontrolResult")]
    result: TimeCheckResult,
}

#[derive(Debug, Deserialize)]
struct TimeCheckResult {
    #[serde(rename = "ogrenciSinifaKayitOlabilir", default)]
    can_add: bool,
    #[serde(rename = "ogrenciSiniftanAyrilabilir", default)]
    can_drop: bool,
}

/// Interpret a time-check body. Anything unparseable reads as closed.
pub fn window_open(body: &str) -> bool {
    match serde_json::from_str::<TimeCheckResponse>(body) {
        Ok(r) => r.result.can_add || r.result.can_drop,
        Err(e) => {
            debug!(error = %e, "unreadable time-check response, treating as closed");
            false
        }
    }
}

/// `reqwest`-backed implementation.
#[derive(Debug, Clone)]
pub struct HttpRegistrationApi {
    client: reqwest::Client,
    course_selection_url: String,
    time_check_url: String,
}

impl HttpRegistrationApi {
    pub fn new(endpoints: &EndpointsConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            course_selection_url: endpoints.course_selection_url.clone(),
            time_check_url: endpoints.time_check_url.clone(),
        })
    }
}

impl RegistrationApi for HttpRegistrationApi {
    fn submit<'a>(
        &'a self,
        token: &'a str,
        lists: &'a WorkingLists,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.course_selection_url)
                .header(AUTHORIZATION, token)
                .json(&CourseRequest::from(lists))
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            debug!(status, body = %body, "course selection response");
            Ok(body)
        })
    }

    fn registration_open<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.time_check_url)
                .header(AUTHORIZATION, token)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::Status(status.as_u16()));
            }
            let body = response.text().await?;
            Ok(window_open(&body))
        })
    }
}
