//! tegrastats-exporter - Prometheus exporter for NVIDIA Jetson telemetry.
//!
//! Supervises the `tegrastats` diagnostics utility as a long-lived child
//! process, parses each periodic snapshot line into typed gauges, and serves
//! them on a Prometheus scrape endpoint. The sampling side (one sequential
//! writer task) and the serving side (concurrent scrape handlers) meet only
//! at the metric registry, so a slow or disconnected scraper can never stall
//! sampling.

pub mod cli;
pub mod commands;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod sampler;
pub mod startup_checks;
pub mod state;
