//! Metrics emitted by the authenticated client
//!
//! - `auth_requests_total` (counter): label `outcome`
//! - `auth_refresh_cycles_total` (counter): label `outcome` (`success`, `failure`, `abandoned`)
//! - `auth_refresh_joined_total` (counter): requests that joined a pending cycle
//! - `auth_refresh_duration_seconds` (histogram): wall time of each cycle
//! - `auth_session_teardowns_total` (counter): label `reason`
//!
//! Without an installed recorder these are no-ops.

use crate::cascade::TeardownReason;

/// Record how a pipeline call ended.
pub fn record_request(outcome: &'static str) {
    metrics::counter!("auth_requests_total", "outcome" => outcome).increment(1);
}

/// Record a settled refresh cycle.
pub fn record_refresh(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("auth_refresh_cycles_total", "outcome" => outcome).increment(1);
    metrics::histogram!("auth_refresh_duration_seconds").record(duration_secs);
}

/// Record a request joining an already-pending refresh cycle.
pub fn record_refresh_joined() {
    metrics::counter!("auth_refresh_joined_total").increment(1);
}

pub fn record_teardown(reason: TeardownReason) {
    metrics::counter!("auth_session_teardowns_total", "reason" => reason.label()).increment(1);
}
