//! Dispatch loop
//!
//! Submits the working lists, hands each response to the retry engine and
//! sleeps between attempts until nothing is pending or the spam window ends.
//! The token is read from the `TokenSource` on every attempt so refreshes
//! take effect immediately.

use std::sync::Arc;
use std::time::Duration;

use provider::TokenSource;
use registration::{RetryEngine, Role, WorkingLists};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::RegistrationApi;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub delay_between_tries: Duration,
    pub spam_duration: Duration,
    /// Stop after the first attempt regardless of outcome.
    pub single_attempt: bool,
}

pub struct Dispatcher {
    api: Arc<dyn RegistrationApi>,
    tokens: Arc<dyn TokenSource>,
    engine: RetryEngine,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        api: Arc<dyn RegistrationApi>,
        tokens: Arc<dyn TokenSource>,
        engine: RetryEngine,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            api,
            tokens,
            engine,
            settings,
        }
    }

    /// Poll the time-check endpoint until registration opens.
    ///
    /// Returns false when `max_wait` passes without the window opening; the
    /// caller dispatches anyway since local and server clocks can disagree.
    pub async fn await_window(&self, interval: Duration, max_wait: Duration) -> bool {
        let started = Instant::now();
        loop {
            if let Some(token) = self.tokens.get() {
                match self.api.registration_open(&token).await {
                    Ok(true) => {
                        info!(waited_ms = started.elapsed().as_millis() as u64, "registration window is open");
                        return true;
                    }
                    Ok(false) => {}
                    Err(e) => debug!(error = %e, "time check failed"),
                }
            }
            if started.elapsed() >= max_wait {
                warn!(
                    max_wait_secs = max_wait.as_secs(),
                    "registration window did not open in time, dispatching anyway"
                );
                return false;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Drive the lists to completion or until the spam window closes.
    ///
    /// `lists` is updated after every response, so it holds whatever is still
    /// pending even if the future is dropped mid-run.
    pub async fn run(&mut self, lists: &mut WorkingLists) {
        let started = Instant::now();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            metrics::counter!("registration_attempts_total").increment(1);

            match self.tokens.get() {
                None => warn!(attempt, "no token available, skipping attempt"),
                Some(token) => match self.api.submit(&token, lists).await {
                    Ok(body) => {
                        *lists = self.engine.apply_response(&body, std::mem::take(lists));
                    }
                    Err(e) => warn!(attempt, error = %e, "course request failed, will retry"),
                },
            }
            record_pending(lists);

            if lists.is_empty() {
                info!(attempt, "every CRN reached a final outcome");
                break;
            }
            if self.settings.single_attempt {
                info!(attempt, "single attempt mode, not retrying");
                break;
            }
            if started.elapsed() + self.settings.delay_between_tries >= self.settings.spam_duration
            {
                warn!(
                    attempt,
                    spam_duration_secs = self.settings.spam_duration.as_secs(),
                    "spam window over"
                );
                break;
            }

            info!(
                attempt,
                add = ?lists.add.as_slice(),
                drop = ?lists.drop.as_slice(),
                "retrying pending CRNs"
            );
            tokio::time::sleep(self.settings.delay_between_tries).await;
        }
    }

    pub fn engine(&self) -> &RetryEngine {
        &self.engine
    }
}

fn record_pending(lists: &WorkingLists) {
    for role in [Role::Add, Role::Drop] {
        metrics::gauge!("registration_pending_items", "role" => role.label())
            .set(lists.get(role).len() as f64);
    }
}

/// Log what could not be added or dropped.
pub fn report(lists: &WorkingLists) {
    if lists.is_empty() {
        info!("all CRNs were added or dropped");
        return;
    }
    warn!(
        add = ?lists.add.as_slice(),
        drop = ?lists.drop.as_slice(),
        "registration ended with pending CRNs"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use provider::StaticToken;
    use registration::WorkingList;
    use std::collections::{HashMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Course API that replays scripted responses and records each request.
    #[derive(Default)]
    struct FakeApi {
        bodies: Mutex<VecDeque<Result<String>>>,
        windows: Mutex<VecDeque<bool>>,
        requests: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl FakeApi {
        fn with_bodies(bodies: Vec<Result<String>>) -> Self {
            Self {
                bodies: Mutex::new(bodies.into()),
                ..Default::default()
            }
        }

        fn requests(&self) -> Vec<(String, serde_json::Value)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl RegistrationApi for FakeApi {
        fn submit<'a>(
            &'a self,
            token: &'a str,
            lists: &'a WorkingLists,
        ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
            Box::pin(async move {
                let request =
                    serde_json::to_value(registration::CourseRequest::from(lists)).unwrap();
                self.requests
                    .lock()
                    .unwrap()
                    .push((token.to_string(), request));
                self.bodies
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(add_body(&[])))
            })
        }

        fn registration_open<'a>(
            &'a self,
            _token: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
            Box::pin(async move { Ok(self.windows.lock().unwrap().pop_front().unwrap_or(false)) })
        }
    }

    /// Token source that hands out a new token on every read.
    #[derive(Default)]
    struct RotatingToken(AtomicUsize);

    impl TokenSource for RotatingToken {
        fn get(&self) -> Option<String> {
            Some(format!("tok-{}", self.0.fetch_add(1, Ordering::SeqCst) + 1))
        }
    }

    fn add_body(pairs: &[(&str, &str)]) -> String {
        let results: Vec<_> = pairs
            .iter()
            .map(|(crn, code)| serde_json::json!({"crn": crn, "resultCode": code}))
            .collect();
        serde_json::json!({"ecrnResultList": results, "scrnResultList": []}).to_string()
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            delay_between_tries: Duration::from_secs(3),
            spam_duration: Duration::from_secs(10),
            single_attempt: false,
        }
    }

    fn dispatcher(api: Arc<FakeApi>, backups: &[(&str, &str)], settings: DispatchSettings) -> Dispatcher {
        let backups: HashMap<String, String> = backups
            .iter()
            .map(|(p, b)| (p.to_string(), b.to_string()))
            .collect();
        Dispatcher::new(
            api,
            Arc::new(StaticToken::new("Bearer t")),
            RetryEngine::new(backups),
            settings,
        )
    }

    fn add_only(items: &[&str]) -> WorkingLists {
        WorkingLists::new(WorkingList::new(items.iter().copied()), WorkingList::default())
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_everything_succeeds() {
        let api = Arc::new(FakeApi::with_bodies(vec![Ok(add_body(&[("A", "successResult")]))]));
        let mut dispatcher = dispatcher(api.clone(), &[], settings());

        let mut left = add_only(&["A"]);
        dispatcher.run(&mut left).await;
        assert!(left.is_empty());
        assert_eq!(api.requests().len(), 1);
        assert_eq!(api.requests()[0].0, "Bearer t");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_rejections() {
        let api = Arc::new(FakeApi::with_bodies(vec![
            Ok(add_body(&[("A", "VAL16")])),
            Ok(add_body(&[("A", "Ekleme İşlemi Başarılı")])),
        ]));
        let mut dispatcher = dispatcher(api.clone(), &[], settings());

        let mut left = add_only(&["A"]);
        dispatcher.run(&mut left).await;
        assert!(left.is_empty());
        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].1["ECRN"], serde_json::json!(["A"]));
    }

    #[tokio::test(start_paused = true)]
    async fn backup_is_sent_after_quota_full() {
        let api = Arc::new(FakeApi::with_bodies(vec![
            Ok(add_body(&[("A", "VAL06"), ("C", "VAL01")])),
            Ok(add_body(&[("B", "successResult"), ("C", "successResult")])),
        ]));
        let mut dispatcher = dispatcher(api.clone(), &[("A", "B")], settings());

        let mut left = add_only(&["A", "C"]);
        dispatcher.run(&mut left).await;
        assert!(left.is_empty());
        assert_eq!(api.requests()[1].1["ECRN"], serde_json::json!(["B", "C"]));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_leaves_latest_lists_with_caller() {
        let api = Arc::new(FakeApi::with_bodies(vec![Ok(add_body(&[
            ("A", "successResult"),
            ("C", "VAL06"),
        ]))]));
        let mut dispatcher = dispatcher(api.clone(), &[("C", "D")], settings());

        let mut lists = add_only(&["A", "C"]);
        let interrupted =
            tokio::time::timeout(Duration::from_secs(1), dispatcher.run(&mut lists)).await;
        assert!(interrupted.is_err());
        assert_eq!(api.requests().len(), 1);
        assert_eq!(lists.add.as_slice(), ["D"]);
        assert_eq!(dispatcher.engine().ledger().active_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_spam_window_ends() {
        let bodies = (0..10).map(|_| Ok(add_body(&[("A", "VAL01")]))).collect();
        let api = Arc::new(FakeApi::with_bodies(bodies));
        let mut dispatcher = dispatcher(api.clone(), &[], settings());

        let started = Instant::now();
        let mut left = add_only(&["A"]);
        dispatcher.run(&mut left).await;
        assert_eq!(left.add.as_slice(), ["A"]);
        assert_eq!(api.requests().len(), 4);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_mode_stops_after_one_request() {
        let api = Arc::new(FakeApi::with_bodies(vec![Ok(add_body(&[("A", "VAL01")]))]));
        let mut dispatcher = dispatcher(
            api.clone(),
            &[],
            DispatchSettings {
                single_attempt: true,
                ..settings()
            },
        );

        let mut left = add_only(&["A"]);
        dispatcher.run(&mut left).await;
        assert_eq!(left.add.as_slice(), ["A"]);
        assert_eq!(api.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_and_garbage_are_retried() {
        let api = Arc::new(FakeApi::with_bodies(vec![
            Err(Error::Status(502)),
            Ok("<html>gateway timeout</html>".into()),
            Ok(add_body(&[("A", "successResult")])),
        ]));
        let mut dispatcher = dispatcher(api.clone(), &[], settings());

        let mut left = add_only(&["A"]);
        dispatcher.run(&mut left).await;
        assert!(left.is_empty());
        assert_eq!(api.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_request_without_token() {
        let api = Arc::new(FakeApi::default());
        let mut dispatcher = Dispatcher::new(
            api.clone(),
            Arc::new(StaticToken::new("")),
            RetryEngine::default(),
            settings(),
        );

        let mut left = add_only(&["A"]);
        dispatcher.run(&mut left).await;
        assert_eq!(left.add.as_slice(), ["A"]);
        assert!(api.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_read_on_every_attempt() {
        let api = Arc::new(FakeApi::with_bodies(vec![
            Ok(add_body(&[("A", "VAL01")])),
            Ok(add_body(&[("A", "successResult")])),
        ]));
        let mut dispatcher = Dispatcher::new(
            api.clone(),
            Arc::new(RotatingToken::default()),
            RetryEngine::default(),
            settings(),
        );

        dispatcher.run(&mut add_only(&["A"])).await;
        let tokens: Vec<String> = api.requests().into_iter().map(|(t, _)| t).collect();
        assert_eq!(tokens, ["tok-1", "tok-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn await_window_returns_when_open() {
        let api = Arc::new(FakeApi::default());
        api.windows.lock().unwrap().extend([false, false, true]);
        let dispatcher = dispatcher(api, &[], settings());

        let started = Instant::now();
        assert!(
            dispatcher
                .await_window(Duration::from_millis(100), Duration::from_secs(120))
                .await
        );
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn await_window_gives_up_after_max_wait() {
        let dispatcher = dispatcher(Arc::new(FakeApi::default()), &[], settings());

        let started = Instant::now();
        assert!(
            !dispatcher
                .await_window(Duration::from_millis(100), Duration::from_secs(2))
                .await
        );
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn pending_gauge_tracks_lists() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let api = Arc::new(FakeApi::with_bodies(vec![Ok(add_body(&[("A", "VAL01")]))]));
        let mut dispatcher = dispatcher(
            api,
            &[],
            DispatchSettings {
                single_attempt: true,
                ..settings()
            },
        );
        let mut left = add_only(&["A"]);
        futures::executor::block_on(dispatcher.run(&mut left));
        assert_eq!(left.pending(), 1);

        let output = handle.render();
        assert!(output.contains("registration_attempts_total 1"), "{output}");
        assert!(output.contains("registration_pending_items{role=\"add\"} 1"), "{output}");
    }
}
