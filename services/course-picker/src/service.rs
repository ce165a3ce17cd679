//! Run-phase state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! Caller (main.rs) executes the I/O implied by each action.
//!
//! Phases, relative to the configured start time:
//! - until start−5 min: idle (browser not started yet)
//! - start−5 min: log in and wait for the first token
//! - until start−15 s: idle, token kept fresh in the background
//! - from start−15 s: poll the time-check endpoint until registration opens
//! - then submit course requests until done or the spam window ends
//!
//! Without a start time every wait is skipped.

use chrono::{NaiveDateTime, TimeDelta};
use std::time::Duration;

/// Login this long before registration opens.
pub const WARMUP_LEAD: Duration = Duration::from_secs(5 * 60);

/// Start polling the time-check endpoint this long before registration opens.
pub const POLL_LEAD: Duration = Duration::from_secs(15);

/// Margin past the start time before submitting when not polling.
pub const START_MARGIN: Duration = Duration::from_millis(100);

/// Per-run inputs fixed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub start_time: Option<NaiveDateTime>,
    /// Skip the time-check and submit only once.
    pub test_mode: bool,
}

/// Run phases.
///
/// `AwaitingWindow` keeps its plan for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum RunState {
    /// Loading config
    Initializing,
    /// Sleeping until it is time to log in
    Warming { plan: Plan },
    /// Refresher started, waiting for the first token
    AcquiringToken { plan: Plan },
    /// Token in hand, waiting for registration to open
    AwaitingWindow { plan: Plan },
    /// Spamming the course endpoint
    Dispatching,
    /// Terminal state
    Finished { exit_code: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Configuration parsed successfully
    ConfigLoaded {
        plan: Plan,
        pending: usize,
        now: NaiveDateTime,
    },
    /// Requested sleep finished
    WarmupElapsed,
    /// First token observed
    TokenAcquired { now: NaiveDateTime },
    /// No token within the first-token timeout, or login failed
    TokenTimeout,
    /// Time check reported open, gave up waiting, or no check was needed
    WindowOpen,
    /// Dispatch loop returned
    DispatchFinished,
    /// SIGINT received
    ShutdownSignal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAction {
    /// Sleep, then send `WarmupElapsed`
    Sleep { delay: Duration },
    /// Start the credential refresher and wait for the first token
    StartRefresher,
    /// Sleep, then optionally poll the time-check endpoint, then send `WindowOpen`
    AwaitWindow { delay: Duration, poll: bool },
    /// Run the dispatch loop
    Dispatch,
    /// Stop background work and exit the process
    Shutdown { exit_code: i32 },
    /// No-op
    None,
}

/// Time from `now` until `target`, zero if it already passed.
fn until(now: NaiveDateTime, target: NaiveDateTime) -> Duration {
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

fn before(start: NaiveDateTime, lead: Duration) -> NaiveDateTime {
    TimeDelta::from_std(lead)
        .ok()
        .and_then(|lead| start.checked_sub_signed(lead))
        .unwrap_or(start)
}

fn after(start: NaiveDateTime, margin: Duration) -> NaiveDateTime {
    TimeDelta::from_std(margin)
        .ok()
        .and_then(|margin| start.checked_add_signed(margin))
        .unwrap_or(start)
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: RunState, event: RunEvent) -> (RunState, RunAction) {
    match (state, event) {
        // --- Initializing ---
        (RunState::Initializing, RunEvent::ConfigLoaded { pending: 0, .. }) => (
            RunState::Finished { exit_code: 0 },
            RunAction::Shutdown { exit_code: 0 },
        ),

        (RunState::Initializing, RunEvent::ConfigLoaded { plan, now, .. }) => match plan.start_time
        {
            Some(start) => (
                RunState::Warming { plan },
                RunAction::Sleep {
                    delay: until(now, before(start, WARMUP_LEAD)),
                },
            ),
            None => (RunState::AcquiringToken { plan }, RunAction::StartRefresher),
        },

        // --- Warming ---
        (RunState::Warming { plan }, RunEvent::WarmupElapsed) => {
            (RunState::AcquiringToken { plan }, RunAction::StartRefresher)
        }

        // --- AcquiringToken ---
        (RunState::AcquiringToken { plan }, RunEvent::TokenAcquired { now }) => {
            match plan.start_time {
                None => (RunState::Dispatching, RunAction::Dispatch),
                Some(start) if plan.test_mode => (
                    RunState::AwaitingWindow { plan },
                    RunAction::AwaitWindow {
                        delay: until(now, after(start, START_MARGIN)),
                        poll: false,
                    },
                ),
                Some(start) => (
                    RunState::AwaitingWindow { plan },
                    RunAction::AwaitWindow {
                        delay: until(now, before(start, POLL_LEAD)),
                        poll: true,
                    },
                ),
            }
        }

        (RunState::AcquiringToken { .. }, RunEvent::TokenTimeout) => (
            RunState::Finished { exit_code: 1 },
            RunAction::Shutdown { exit_code: 1 },
        ),

        // --- AwaitingWindow ---
        (RunState::AwaitingWindow { .. }, RunEvent::WindowOpen) => {
            (RunState::Dispatching, RunAction::Dispatch)
        }

        // --- Dispatching ---
        (RunState::Dispatching, RunEvent::DispatchFinished) => (
            RunState::Finished { exit_code: 0 },
            RunAction::Shutdown { exit_code: 0 },
        ),

        // --- Any state + shutdown = stop ---
        (RunState::Finished { exit_code }, RunEvent::ShutdownSignal) => {
            (RunState::Finished { exit_code }, RunAction::None)
        }
        (_, RunEvent::ShutdownSignal) => (
            RunState::Finished { exit_code: 130 },
            RunAction::Shutdown { exit_code: 130 },
        ),

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, RunAction::None),
    }
}
