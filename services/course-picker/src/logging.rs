//! Log setup
//!
//! Human-readable lines on stdout, JSON lines in `logs/course-picker.log`.
//! Level comes from `LOG_LEVEL`, then `RUST_LOG`, defaulting to `info`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE: &str = "course-picker.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Open (append) the run log inside `dir`, creating the directory.
pub fn open_log_file(dir: &Path) -> std::io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

/// Subscriber with the stdout and JSON file layers.
pub fn subscriber(file: File) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
}

/// Install the global subscriber. Returns the log file path.
pub fn init(dir: &Path) -> std::io::Result<PathBuf> {
    let (file, path) = open_log_file(dir)?;
    subscriber(file).init();
    Ok(path)
}
