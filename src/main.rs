//! tegrastats-exporter - version 0.1.0
//!
//! Prometheus exporter for NVIDIA Jetson tegrastats telemetry.
//! This is the main entry point that wires the sampling pipeline to the
//! scrape server and handles subcommands.

use axum::{routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::net::SocketAddr;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info, Level};

use tegrastats_exporter::cli::{Args, Commands, LogLevel};
use tegrastats_exporter::commands::{command_check, command_config};
use tegrastats_exporter::config::{
    resolve_config, show_config, validate_effective_config, Config, DEFAULT_BIND_ADDR,
    DEFAULT_PORT, DEFAULT_TELEMETRY_PATH,
};
use tegrastats_exporter::handlers::{health_handler, metrics_handler, root_handler};
use tegrastats_exporter::pipeline;
use tegrastats_exporter::sampler::{Sampler, SamplerConfig};
use tegrastats_exporter::startup_checks::EXIT_UTILITY_MISSING;
use tegrastats_exporter::state::AppState;

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => Level::ERROR,
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, &args.config_format);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        let config = load_validated_config(&args)?;

        return match command {
            Commands::Check { run } => command_check(*run, &config),
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), format.clone(), *commented),
        };
    }

    // Load configuration for main server mode
    let config = load_validated_config(&args)?;

    setup_logging(&args);

    info!("Starting tegrastats-exporter");

    let bind_ip_str = config.bind.clone().unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let metrics_path = config
        .telemetry_path
        .clone()
        .unwrap_or_else(|| DEFAULT_TELEMETRY_PATH.to_string());

    let state = AppState::new(config.clone())?;
    debug!("Prometheus registry initialized");

    // Resolve and launch the tegrastats child process. A missing utility is
    // fatal before the run loop: there is nothing to supervise.
    let sampler_config = match SamplerConfig::from_config(&config) {
        Ok(sc) => sc,
        Err(e) => {
            error!("❌ {}", e);
            eprintln!("❌ {}", e);
            std::process::exit(EXIT_UTILITY_MISSING);
        }
    };

    let mut sampler = Sampler::spawn(
        sampler_config,
        state.metrics.child_restarts_total.clone(),
    );
    let lines = sampler.take_lines();

    // The single registry writer.
    let pipeline_task = tokio::spawn(pipeline::run(state.clone(), lines));

    // Configure HTTP server routes
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let app = Router::new()
        .route("/", get(root_handler))
        .route(&metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone());

    // Check if TLS is enabled
    let enable_tls = config.enable_tls.unwrap_or(false);

    if enable_tls {
        // These paths are guaranteed to exist since validate_effective_config() ran
        let cert_path = config
            .tls_cert_path
            .as_ref()
            .expect("tls_cert_path should be set when enable_tls is true (validated at startup)");
        let key_path = config
            .tls_key_path
            .as_ref()
            .expect("tls_key_path should be set when enable_tls is true (validated at startup)");

        info!("Loading TLS certificate from: {}", cert_path);
        info!("Loading TLS private key from: {}", key_path);

        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| {
                error!("Failed to load TLS configuration: {}", e);
                e
            })?;

        info!(
            "tegrastats-exporter listening on https://{}:{}{}",
            bind_ip_str, port, metrics_path
        );

        let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                    sampler.shutdown();
                    return Err(e.into());
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting...");
            }
        }
    } else {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "tegrastats-exporter listening on http://{}:{}{}",
            bind_ip_str, port, metrics_path
        );

        let server = axum::serve(listener, app);

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                    sampler.shutdown();
                    return Err(e.into());
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting...");
            }
        }
    }

    // Teardown order: the server stopped accepting above; now terminate the
    // child process, then let the pipeline drain its closed stream.
    sampler.shutdown();
    pipeline_task.abort();

    info!("tegrastats-exporter stopped gracefully");
    Ok(())
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}
