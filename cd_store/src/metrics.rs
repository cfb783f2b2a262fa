//! Metric hooks for listing latency, release counters and terminal sessions.
//!
//! The exporter is installed by the binary; without one these calls are no-ops.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Record how long one listing query took.
pub fn app_listing_duration(operation: &str, app: &str, elapsed: Duration) {
    histogram!(
        "app_listing_duration",
        "operation" => operation.to_string(),
        "app" => app.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Record a release-counter assignment retried after a transient failure.
pub fn release_counter_retry() {
    counter!("cd_release_counter_retries_total").increment(1);
}

/// Record a committed release-counter assignment.
pub fn release_counter_assigned(deployment_type: &str) {
    counter!("cd_release_counters_assigned_total", "deployment_type" => deployment_type.to_string())
        .increment(1);
}

/// Record an availability decision.
pub fn oracle_decision(available: bool) {
    let result = if available { "available" } else { "refused" };
    counter!("cd_artifact_availability_total", "result" => result).increment(1);
}

/// Set the number of tracked terminal sessions in a status.
pub fn terminal_sessions(status: &str, count: usize) {
    gauge!("cd_terminal_sessions", "status" => status.to_string()).set(count as f64);
}

/// Record a promotion request state change.
pub fn promotion_status_changed(status: &str, rows: usize) {
    counter!("cd_promotion_requests_total", "status" => status.to_string()).increment(rows as u64);
}
