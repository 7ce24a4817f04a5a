//! Subcommand implementations for tegrastats-exporter.

pub mod check;
pub mod config;

pub use check::command_check;
pub use config::command_config;
