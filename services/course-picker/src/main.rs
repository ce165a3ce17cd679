//! Course Picker
//!
//! Single-binary registration sniper that:
//! 1. Waits until shortly before registration opens
//! 2. Logs in through a browser and keeps a fresh bearer token in the background
//! 3. Polls the time-check endpoint until the window opens
//! 4. Submits the add/drop lists until every CRN is settled or time runs out

mod api;
mod browser;
mod config;
mod dispatch;
mod error;
mod logging;
mod metrics;
mod service;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use credentials::{CredentialRefresher, RefresherConfig};
use provider::LoginCredentials;
use registration::{RetryEngine, WorkingList, WorkingLists};
use tracing::{Instrument, error, info, info_span, warn};

use crate::api::HttpRegistrationApi;
use crate::browser::{BrowserSessionProvider, BrowserSettings};
use crate::config::Config;
use crate::dispatch::{DispatchSettings, Dispatcher};
use crate::service::{Plan, RunAction, RunEvent, RunState, handle_event};

const LOG_DIR: &str = "logs";

/// Command line: `--config <path>`, `--test` / `-t`.
struct Args {
    config: Option<String>,
    test_mode: bool,
}

impl Args {
    fn parse(args: &[String]) -> Self {
        let config = args
            .iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1))
            .cloned();
        let test_mode = args.iter().any(|a| a == "--test" || a == "-t");
        Self { config, test_mode }
    }
}

fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Run `fut` unless Ctrl-C arrives first.
async fn interruptible<F: Future>(fut: F) -> Option<F::Output> {
    tokio::select! {
        output = fut => Some(output),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_path = logging::init(Path::new(LOG_DIR)).context("failed to open log file")?;

    let args = Args::parse(&std::env::args().collect::<Vec<_>>());
    let run_id = uuid::Uuid::new_v4();
    info!(%run_id, log = %log_path.display(), test_mode = args.test_mode, "starting course-picker");

    let exit_code = run(args)
        .instrument(info_span!("run", %run_id))
        .await?;
    std::process::exit(exit_code);
}

async fn run(args: Args) -> Result<i32> {
    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let password = config.account.password();
    info!(
        user = %config.account.username,
        password = %password.masked(),
        add = ?config.courses.add,
        drop = ?config.courses.drop,
        backups = config.courses.backups.len(),
        start_time = ?config.schedule.start_time,
        "configuration loaded"
    );

    let provider = Arc::new(BrowserSessionProvider::new(BrowserSettings::from_config(
        &config,
    )));
    let refresher = Arc::new(CredentialRefresher::new(
        provider.clone(),
        LoginCredentials {
            username: config.account.username.clone(),
            password,
        },
        RefresherConfig {
            interval: config.timing.token_refresh_interval(),
            call_timeout: config.timing.provider_timeout(),
        },
    ));
    let api = HttpRegistrationApi::new(&config.endpoints, config.timing.request_timeout())
        .context("failed to build HTTP client")?;
    let mut dispatcher = Dispatcher::new(
        Arc::new(api),
        refresher.clone(),
        RetryEngine::new(config.courses.backups.clone()),
        DispatchSettings {
            delay_between_tries: config.timing.delay_between_tries(),
            spam_duration: config.timing.spam_duration(),
            single_attempt: args.test_mode,
        },
    );

    let mut lists = WorkingLists::new(
        WorkingList::new(config.courses.add.iter().cloned()),
        WorkingList::new(config.courses.drop.iter().cloned()),
    );
    let plan = Plan {
        start_time: config.schedule.start_time,
        test_mode: args.test_mode,
    };
    let mut dispatched = false;

    let (mut state, mut action) = handle_event(
        RunState::Initializing,
        RunEvent::ConfigLoaded {
            plan,
            pending: lists.pending(),
            now: now(),
        },
    );

    loop {
        info!(?state, ?action, "run phase");
        let event = match action {
            RunAction::Sleep { delay } => {
                info!(wait_secs = delay.as_secs(), "waiting until five minutes before registration");
                interruptible(tokio::time::sleep(delay))
                    .await
                    .map_or(RunEvent::ShutdownSignal, |_| RunEvent::WarmupElapsed)
            }

            RunAction::StartRefresher => {
                let timeout = config.timing.first_token_timeout();
                let acquired = interruptible(async {
                    if let Err(e) = refresher.start().await {
                        error!(error = %crate::error::Error::from(e), "could not start credential refresher");
                        return false;
                    }
                    info!(timeout_secs = timeout.as_secs(), "waiting for first token");
                    refresher.wait_for_first_token(timeout).await
                })
                .await;
                match acquired {
                    None => RunEvent::ShutdownSignal,
                    Some(true) => {
                        info!("token acquired, refreshing in the background");
                        RunEvent::TokenAcquired { now: now() }
                    }
                    Some(false) => {
                        error!(error = %crate::error::Error::NoToken(timeout), "giving up");
                        RunEvent::TokenTimeout
                    }
                }
            }

            RunAction::AwaitWindow { delay, poll } => {
                let interval = config.timing.time_check_interval();
                let max_wait = config.timing.max_extra_wait();
                let dispatcher = &dispatcher;
                let waited = interruptible(async move {
                    tokio::time::sleep(delay).await;
                    if poll {
                        info!("waiting for registration to open");
                        dispatcher.await_window(interval, max_wait).await;
                    }
                })
                .await;
                waited.map_or(RunEvent::ShutdownSignal, |_| RunEvent::WindowOpen)
            }

            RunAction::Dispatch => {
                info!(pending = lists.pending(), "submitting course requests");
                dispatched = true;
                interruptible(dispatcher.run(&mut lists))
                    .await
                    .map_or(RunEvent::ShutdownSignal, |_| RunEvent::DispatchFinished)
            }

            RunAction::Shutdown { exit_code } => {
                refresher.stop();
                refresher.join().await;
                provider.close().await;

                if dispatched {
                    dispatch::report(&lists);
                    info!(
                        active_substitutions = dispatcher.engine().ledger().active_len(),
                        "registration finished"
                    );
                }
                if let Err(e) = metrics::write_snapshot(&prometheus, Path::new(LOG_DIR)) {
                    warn!(error = %e, "failed to write metrics snapshot");
                }
                info!(exit_code, "shutting down");
                return Ok(exit_code);
            }

            RunAction::None => {
                anyhow::bail!("unexpected transition, stuck in {state:?}");
            }
        };

        (state, action) = handle_event(state, event);
    }
}
