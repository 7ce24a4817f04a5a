//! Metrics endpoint handler for Prometheus scraping.
//!
//! Renders the registry's current state in the Prometheus text exposition
//! format. Each request gets the freshest gauge values; there is no caching
//! layer between the sampling pipeline and the encoder.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the metrics exposition endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing metrics request");

    // Refresh the staleness flag before gathering so it describes the
    // exposition being rendered.
    let stale = state.metrics.stale_series_count(state.stale_threshold());
    state.metrics.stale_series.set(stale as f64);

    let families = state.registry.gather();
    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    let encoder = TextEncoder::new();

    if encoder.encode(&families, &mut buffer).is_err() {
        error!("Failed to encode Prometheus metrics");
        return Err(MetricsError::EncodingFailed);
    }

    state
        .metrics
        .scrape_duration
        .set(start.elapsed().as_secs_f64());

    debug!(
        "Metrics request completed: {} families, {} bytes",
        families.len(),
        buffer.len()
    );

    String::from_utf8(buffer).map_err(|_| MetricsError::EncodingFailed)
}
