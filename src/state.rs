//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed to HTTP
//! handlers and written by the sampling pipeline task. Tests build isolated
//! instances with [`AppState::new`] instead of touching process globals.

use std::sync::Arc;
use std::time::{Duration, Instant};

use prometheus::Registry;

use crate::config::{Config, DEFAULT_STALE_AFTER_SECONDS};
use crate::metrics::TegraMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests and the pipeline task.
pub struct AppState {
    pub registry: Registry,
    pub metrics: TegraMetrics,
    pub config: Arc<Config>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Builds a fresh registry plus instruments for the given config.
    pub fn new(config: Config) -> Result<SharedState, Box<dyn std::error::Error>> {
        let registry = Registry::new();
        let metrics = TegraMetrics::new(&registry)?;
        Ok(Arc::new(Self {
            registry,
            metrics,
            config: Arc::new(config),
            start_time: Instant::now(),
        }))
    }

    /// Effective staleness threshold for flagging unwritten series.
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(
            self.config
                .stale_after_seconds
                .unwrap_or(DEFAULT_STALE_AFTER_SECONDS),
        )
    }
}
