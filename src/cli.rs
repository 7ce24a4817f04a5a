//! CLI arguments and subcommands for tegrastats-exporter.
//!
//! This module defines the command-line interface structure using the clap
//! library, including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "tegrastats-exporter",
    about = "Prometheus exporter for NVIDIA Jetson tegrastats telemetry",
    long_about = "Prometheus exporter for NVIDIA Jetson tegrastats telemetry.\n\n\
                  Supervises the tegrastats utility as a child process, parses each \
                  snapshot line into CPU/GPU load and frequency, memory, temperature, \
                  and power-rail gauges, and serves them on a Prometheus scrape endpoint.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// HTTP path the metrics exposition is served on
    #[arg(long)]
    pub telemetry_path: Option<String>,

    /// Seconds between tegrastats snapshots
    #[arg(short = 'i', long)]
    pub interval_seconds: Option<u64>,

    /// Path to the tegrastats binary (searches $PATH when unset)
    #[arg(long)]
    pub utility_path: Option<PathBuf>,

    /// Seconds after which an unwritten series counts as stale
    #[arg(long)]
    pub stale_after_seconds: Option<u64>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify the tegrastats utility can be located and parsed
    Check {
        /// Also run tegrastats briefly and parse one snapshot line
        #[arg(long)]
        run: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path (stdout when omitted)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include explanatory comments
        #[arg(long)]
        commented: bool,
    },
}
