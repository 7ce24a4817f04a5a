//! The sampling pipeline: line stream in, registry writes out.
//!
//! This is the single writer of the metric registry. It runs as one
//! dedicated task for the process lifetime, strictly sequential: never more
//! than one apply in flight, so scrape readers always observe whole-sample
//! state transitions.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::parser;
use crate::sampler::RawLine;
use crate::state::SharedState;

/// Consumes the sampler's line stream until it closes: parse each line and
/// apply it to the registry, skipping unparseable lines.
///
/// The stream only closes on shutdown (the supervision task handles child
/// restarts internally), so this loop needs no restart logic of its own.
pub async fn run(state: SharedState, mut lines: mpsc::Receiver<RawLine>) {
    info!("Sampling pipeline started");

    while let Some(raw) = lines.recv().await {
        state.metrics.lines_total.inc();

        match parser::parse_line(&raw.text) {
            Ok(sample) => {
                state.metrics.apply(&sample, raw.received_at);
            }
            Err(e) => {
                // Expected occasionally (truncated writes, banner lines);
                // only a sustained failure rate is an operational concern,
                // which the counter makes visible.
                debug!("Skipping snapshot line: {}", e);
                state.metrics.parse_failures_total.inc();
            }
        }
    }

    info!("Line stream closed, sampling pipeline exiting");
}
