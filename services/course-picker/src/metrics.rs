//! Prometheus metrics
//!
//! No endpoint is served; a text snapshot is written next to the log when the
//! run ends.
//!
//! - `registration_attempts_total` (counter)
//! - `registration_item_outcomes_total` (counter): labels `role`, `outcome`
//! - `registration_substitutions_total` (counter): label `kind`
//! - `registration_malformed_responses_total` (counter)
//! - `registration_pending_items` (gauge): label `role`
//! - `token_refresh_total` (counter): label `result`

use std::path::Path;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const SNAPSHOT_FILE: &str = "metrics.prom";

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    describe();
    handle
}

fn describe() {
    metrics::describe_counter!(
        "registration_attempts_total",
        "Course selection requests attempted"
    );
    metrics::describe_counter!(
        "registration_item_outcomes_total",
        "Per-CRN results by role and outcome class"
    );
    metrics::describe_counter!(
        "registration_substitutions_total",
        "Backup CRN swaps and reversals"
    );
    metrics::describe_counter!(
        "registration_malformed_responses_total",
        "Course responses that could not be parsed"
    );
    metrics::describe_gauge!(
        "registration_pending_items",
        "CRNs still waiting for a final outcome"
    );
    metrics::describe_counter!("token_refresh_total", "Token refresh cycles by result");
}

/// Write the current metrics in Prometheus text format to `dir/metrics.prom`.
pub fn write_snapshot(handle: &PrometheusHandle, dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(SNAPSHOT_FILE), handle.render())
}
