//! Health check endpoint handler.
//!
//! Reports the sampling pipeline's own condition as plain text: line and
//! failure counts, child restarts, and the age of the last applied sample.
//! The endpoint returns 503 only before the first sample has been applied;
//! after that the exporter serves stale values rather than going unhealthy,
//! because scrape availability is the primary external guarantee.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the `/health` endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let last_sample_age = state.metrics.seconds_since_last_sample();

    let (status, message) = match last_sample_age {
        Some(age) if age <= state.stale_threshold().as_secs_f64() => (StatusCode::OK, "OK"),
        Some(_) => (StatusCode::OK, "OK - samples stale"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No sample received yet"),
    };

    let uptime_secs = state.start_time.elapsed().as_secs();
    let uptime_str = format!(
        "{}h {}m {}s",
        uptime_secs / 3600,
        (uptime_secs % 3600) / 60,
        uptime_secs % 60
    );

    let mut body = String::new();
    writeln!(body, "{message}").ok();
    writeln!(body).ok();
    writeln!(body, "Uptime:              {uptime_str}").ok();
    writeln!(body, "Lines received:      {}", state.metrics.lines_total.get()).ok();
    writeln!(
        body,
        "Parse failures:      {}",
        state.metrics.parse_failures_total.get()
    )
    .ok();
    writeln!(
        body,
        "Child restarts:      {}",
        state.metrics.child_restarts_total.get()
    )
    .ok();

    match last_sample_age {
        Some(age) => {
            let ts = state.metrics.last_sample_timestamp_seconds.get();
            let when: DateTime<Utc> =
                (UNIX_EPOCH + Duration::from_secs_f64(ts.max(0.0))).into();
            writeln!(body, "Last sample:         {} ({:.1}s ago)", when.to_rfc3339(), age).ok();
        }
        None => {
            writeln!(body, "Last sample:         never").ok();
        }
    }

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        body,
    )
}
