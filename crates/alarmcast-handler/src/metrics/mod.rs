//! Prometheus metrics for Alarmcast
//!
//! Exposes metrics at `/metrics` endpoint in Prometheus format. The
//! `record_*` functions are no-ops until a recorder is installed, so the
//! one-shot CLI path can call them freely.

use alarmcast_core::{Error, Result};
use anyhow::anyhow;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::{Duration, Instant};

use crate::server::AppState;

/// Metric names
pub mod names {
    pub const EVENTS_RECEIVED_TOTAL: &str = "alarmcast_events_received_total";
    pub const EVENTS_SKIPPED_TOTAL: &str = "alarmcast_events_skipped_total";
    pub const EVENTS_IGNORED_TOTAL: &str = "alarmcast_events_ignored_total";
    pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "alarmcast_notifications_published_total";
    pub const FAILURES_TOTAL: &str = "alarmcast_failures_total";
    pub const PUBLISH_DURATION_SECONDS: &str = "alarmcast_publish_duration_seconds";

    pub const UPTIME_SECONDS: &str = "alarmcast_uptime_seconds";
    pub const INFO: &str = "alarmcast_info";
}

/// Metrics recorder
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
    start_time: Instant,
}

impl MetricsRecorder {
    /// Install the global Prometheus recorder
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| Error::Other(anyhow!("Failed to install Prometheus recorder: {}", e)))?;

        gauge!(names::INFO, "version" => alarmcast_core::VERSION).set(1.0);

        Ok(Self {
            handle,
            start_time: Instant::now(),
        })
    }

    /// Recorder that is not installed globally. The metric macros never reach
    /// its handle, so it renders no series, uptime included.
    pub fn detached() -> Self {
        Self {
            handle: PrometheusBuilder::new().build_recorder().handle(),
            start_time: Instant::now(),
        }
    }

    /// Get metrics output in Prometheus format
    pub fn render(&self) -> String {
        gauge!(names::UPTIME_SECONDS).set(self.start_time.elapsed().as_secs_f64());
        self.handle.render()
    }
}

pub fn record_event_received() {
    counter!(names::EVENTS_RECEIVED_TOTAL).increment(1);
}

/// Path outside the audio prefix
pub fn record_event_skipped() {
    counter!(names::EVENTS_SKIPPED_TOTAL).increment(1);
}

/// Event for a bucket the trigger is not registered on
pub fn record_event_ignored() {
    counter!(names::EVENTS_IGNORED_TOTAL).increment(1);
}

pub fn record_published(elapsed: Duration) {
    counter!(names::NOTIFICATIONS_PUBLISHED_TOTAL).increment(1);
    histogram!(names::PUBLISH_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

pub fn record_failure(code: &'static str) {
    counter!(names::FAILURES_TOTAL, "code" => code).increment(1);
}

/// Handler for /metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let output = state.metrics.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_render() {
        let recorder = MetricsRecorder::detached();
        // Nothing is installed, so the global macros do not reach this handle
        record_event_received();
        record_failure("TimeoutFailure");
        let output = recorder.render();
        assert!(!output.contains(names::EVENTS_RECEIVED_TOTAL));
        assert!(!output.contains(names::UPTIME_SECONDS));
    }

    #[test]
    fn test_metric_names_are_namespaced() {
        for name in [
            names::EVENTS_RECEIVED_TOTAL,
            names::EVENTS_SKIPPED_TOTAL,
            names::EVENTS_IGNORED_TOTAL,
            names::NOTIFICATIONS_PUBLISHED_TOTAL,
            names::FAILURES_TOTAL,
            names::PUBLISH_DURATION_SECONDS,
        ] {
            assert!(name.starts_with("alarmcast_"));
        }
    }
}
