use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Installs the Prometheus recorder once per process when enabled.
pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    describe_counter!("attempts_started_total", "Attempts created by start");
    describe_counter!("attempts_closed_total", "Attempts closed, labelled by final status");
    describe_counter!("expired_attempts_closed_total", "Attempts closed at their deadline");
    describe_counter!("sections_auto_advanced_total", "Timed sections advanced on expiry");
    describe_counter!("answers_recorded_total", "Answers saved during attempts");
    describe_counter!("answers_graded_total", "Answers graded automatically or by hand");
    describe_counter!("attempts_graded_total", "Attempts promoted to graded");
    describe_counter!("http_requests_total", "HTTP responses by status");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request latency by status"
    );
}
