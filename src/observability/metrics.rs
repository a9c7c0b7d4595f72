//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_calls_total` (counter): finished calls by provider, outcome
//! - `guard_call_duration_seconds` (histogram): end-to-end call latency
//! - `guard_call_attempts_total` (counter): transport attempts by provider
//! - `guard_retries_total` (counter): retries by provider, strategy
//! - `guard_retry_delay_seconds` (histogram): computed backoff delays
//! - `guard_retry_events_dropped_total` (counter): undelivered retry notifications
//! - `guard_key_selections_total` (counter): API key selections by provider
//! - `guard_ids_generated_total` (counter): IDs issued
//! - `guard_id_backpressure_total` (counter): sequence exhaustion waits
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_call(provider: &str, success: bool, elapsed: Duration) {
    let outcome = if success { "success" } else { "failure" };
    ::metrics::counter!(
        "guard_calls_total",
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("guard_call_duration_seconds", "provider" => provider.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_attempt(provider: &str) {
    ::metrics::counter!("guard_call_attempts_total", "provider" => provider.to_string())
        .increment(1);
}

pub fn record_retry(provider: &str, strategy: &'static str) {
    ::metrics::counter!(
        "guard_retries_total",
        "provider" => provider.to_string(),
        "strategy" => strategy
    )
    .increment(1);
}

pub fn record_retry_delay(delay: Duration) {
    ::metrics::histogram!("guard_retry_delay_seconds").record(delay.as_secs_f64());
}

pub fn record_retry_event_dropped(reason: &'static str) {
    ::metrics::counter!("guard_retry_events_dropped_total", "reason" => reason).increment(1);
}

pub fn record_key_selection(provider: &str) {
    ::metrics::counter!("guard_key_selections_total", "provider" => provider.to_string())
        .increment(1);
}

pub fn record_id_generated() {
    ::metrics::counter!("guard_ids_generated_total").increment(1);
}

pub fn record_id_backpressure() {
    ::metrics::counter!("guard_id_backpressure_total").increment(1);
}
