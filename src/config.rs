//! Configuration management for tegrastats-exporter.
//!
//! This module handles loading, merging, and validating configuration from
//! files, environment variables, and CLI arguments. It supports YAML, JSON,
//! and TOML formats. Precedence: CLI > environment > config file > defaults.

use crate::cli::{Args, ConfigFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub const DEFAULT_SAMPLE_INTERVAL_SECONDS: u64 = 1;
pub const DEFAULT_STALE_AFTER_SECONDS: u64 = 30;
pub const DEFAULT_RESTART_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_RESTART_BACKOFF_MAX_MS: u64 = 60_000;

/// Prefix for environment-variable overrides.
pub const ENV_PREFIX: &str = "TEGRA_EXPORTER_";

/// Probed when no explicit --config path is given.
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "tegrastats-exporter.yaml",
    "/etc/tegrastats-exporter/config.yaml",
    "/etc/tegrastats-exporter/config.toml",
];

/// Exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,
    /// HTTP path the exposition is served on.
    #[serde(alias = "telemetry-path", alias = "listen-path")]
    pub telemetry_path: Option<String>,

    // Sampling
    #[serde(alias = "sample-interval-seconds")]
    pub sample_interval_seconds: Option<u64>,
    /// Explicit location of the tegrastats binary; $PATH is searched otherwise.
    #[serde(alias = "utility-path")]
    pub utility_path: Option<PathBuf>,
    #[serde(alias = "stale-after-seconds")]
    pub stale_after_seconds: Option<u64>,
    #[serde(alias = "restart-backoff-ms")]
    pub restart_backoff_ms: Option<u64>,
    #[serde(alias = "restart-backoff-max-ms")]
    pub restart_backoff_max_ms: Option<u64>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            telemetry_path: Some(DEFAULT_TELEMETRY_PATH.to_string()),
            sample_interval_seconds: Some(DEFAULT_SAMPLE_INTERVAL_SECONDS),
            utility_path: None,
            stale_after_seconds: Some(DEFAULT_STALE_AFTER_SECONDS),
            restart_backoff_ms: Some(DEFAULT_RESTART_BACKOFF_MS),
            restart_backoff_max_ms: Some(DEFAULT_RESTART_BACKOFF_MAX_MS),
            log_level: Some("info".into()),
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.sample_interval_seconds == Some(0) {
        return Err("sample_interval_seconds must be at least 1".into());
    }

    if cfg.stale_after_seconds == Some(0) {
        return Err("stale_after_seconds must be at least 1".into());
    }

    if let Some(path) = cfg.telemetry_path.as_deref() {
        if !path.starts_with('/') {
            return Err(format!("telemetry_path must start with '/', got '{}'", path).into());
        }
    }

    if let Some(initial) = cfg.restart_backoff_ms {
        let max = cfg.restart_backoff_max_ms.unwrap_or(DEFAULT_RESTART_BACKOFF_MAX_MS);
        if initial == 0 {
            return Err("restart_backoff_ms must be at least 1".into());
        }
        if max < initial {
            return Err("restart_backoff_max_ms must be >= restart_backoff_ms".into());
        }
    }

    // TLS validation
    if cfg.enable_tls.unwrap_or(false) {
        let cert_path = cfg.tls_cert_path.as_deref();
        let key_path = cfg.tls_key_path.as_deref();

        match (cert_path, key_path) {
            (None, None) => {
                return Err(
                    "TLS is enabled but neither tls_cert_path nor tls_key_path are set".into(),
                );
            }
            (Some(_), None) => {
                return Err("TLS is enabled but tls_key_path is not set".into());
            }
            (None, Some(_)) => {
                return Err("TLS is enabled but tls_cert_path is not set".into());
            }
            (Some(cert), Some(key)) => {
                if !Path::new(cert).exists() {
                    return Err(format!("TLS certificate file not found: {}", cert).into());
                }
                if !Path::new(key).exists() {
                    return Err(format!("TLS private key file not found: {}", key).into());
                }
            }
        }
    }

    Ok(())
}

/// Resolves configuration with precedence: CLI > environment > file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    apply_env_overrides(&mut config, std::env::vars());

    // Override with CLI args
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(path) = &args.telemetry_path {
        config.telemetry_path = Some(path.clone());
    }
    if let Some(interval) = args.interval_seconds {
        config.sample_interval_seconds = Some(interval);
    }
    if let Some(utility) = &args.utility_path {
        config.utility_path = Some(utility.clone());
    }
    if let Some(stale) = args.stale_after_seconds {
        config.stale_after_seconds = Some(stale);
    }
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert) = &args.tls_cert {
        config.tls_cert_path = Some(cert.display().to_string());
    }
    if let Some(key) = &args.tls_key {
        config.tls_key_path = Some(key.display().to_string());
    }

    Ok(config)
}

/// Applies `TEGRA_EXPORTER_*` environment variables onto the config.
///
/// Unrecognized names under the prefix and unparsable values are warned
/// about and ignored, never fatal.
pub fn apply_env_overrides<I>(config: &mut Config, vars: I)
where
    I: Iterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match name {
            "SAMPLE_INTERVAL_SECONDS" => match value.parse::<u64>() {
                Ok(v) => config.sample_interval_seconds = Some(v),
                Err(_) => warn_bad_value(&key, &value),
            },
            "LISTEN_PORT" => match value.parse::<u16>() {
                Ok(v) => config.port = Some(v),
                Err(_) => warn_bad_value(&key, &value),
            },
            "LISTEN_PATH" => config.telemetry_path = Some(value),
            "UTILITY_PATH" => config.utility_path = Some(PathBuf::from(value)),
            other => {
                tracing::warn!(
                    "Ignoring unrecognized environment option {}{}",
                    ENV_PREFIX,
                    other
                );
            }
        }
    }
}

fn warn_bad_value(key: &str, value: &str) {
    tracing::warn!("Ignoring unparsable value '{}' for {}", value, key);
}

/// Loads the config file from an explicit path or the default locations.
/// Returns defaults when no file is present.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(path) = explicit {
        info!("Loading config file: {}", path.display());
        return parse_config_file(path);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading config file: {}", path.display());
            return parse_config_file(path);
        }
    }

    Ok(Config::default())
}

/// Parses a config file, with the format chosen by file extension
/// (unknown extensions are treated as YAML).
fn parse_config_file(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("yaml")
        .to_ascii_lowercase();

    let parsed: Config = match ext.as_str() {
        "json" => serde_json::from_str(&content)
            .map_err(|e| format!("Invalid JSON in {}: {}", path.display(), e))?,
        "toml" => toml::from_str(&content)
            .map_err(|e| format!("Invalid TOML in {}: {}", path.display(), e))?,
        _ => serde_yaml::from_str(&content)
            .map_err(|e| format!("Invalid YAML in {}: {}", path.display(), e))?,
    };

    // File values fill gaps over the defaults.
    let mut config = Config::default();
    merge_config(&mut config, parsed);
    Ok(config)
}

fn merge_config(base: &mut Config, overlay: Config) {
    macro_rules! take {
        ($field:ident) => {
            if overlay.$field.is_some() {
                base.$field = overlay.$field;
            }
        };
    }
    take!(port);
    take!(bind);
    take!(telemetry_path);
    take!(sample_interval_seconds);
    take!(utility_path);
    take!(stale_after_seconds);
    take!(restart_backoff_ms);
    take!(restart_backoff_max_ms);
    take!(log_level);
    take!(enable_tls);
    take!(tls_cert_path);
    take!(tls_key_path);
}

/// Renders the effective config in the requested format.
pub fn render_config(
    config: &Config,
    format: &ConfigFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    Ok(match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
    })
}

/// Prints the effective merged config and exits successfully.
pub fn show_config(
    config: &Config,
    format: &ConfigFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render_config(config, format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("tegrastats-exporter").chain(argv.iter().copied()))
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate_effective_config(&config).is_ok());
        assert_eq!(config.port, Some(DEFAULT_PORT));
        assert_eq!(config.telemetry_path.as_deref(), Some("/metrics"));
    }

    #[test]
    fn cli_overrides_env_and_file() {
        let mut config = Config::default();
        config.port = Some(1111); // pretend this came from a file

        apply_env_overrides(
            &mut config,
            vec![("TEGRA_EXPORTER_LISTEN_PORT".to_string(), "2222".to_string())].into_iter(),
        );
        assert_eq!(config.port, Some(2222));

        let args = args(&["--port", "3333"]);
        if let Some(port) = args.port {
            config.port = Some(port);
        }
        assert_eq!(config.port, Some(3333));
    }

    #[test]
    fn env_overrides_known_options() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            vec![
                (
                    "TEGRA_EXPORTER_SAMPLE_INTERVAL_SECONDS".to_string(),
                    "5".to_string(),
                ),
                ("TEGRA_EXPORTER_LISTEN_PATH".to_string(), "/telemetry".to_string()),
                (
                    "TEGRA_EXPORTER_UTILITY_PATH".to_string(),
                    "/opt/nvidia/tegrastats".to_string(),
                ),
                // Unknown option: warned, ignored, not fatal.
                ("TEGRA_EXPORTER_FROBNICATE".to_string(), "yes".to_string()),
                // Unparsable value: warned, ignored.
                ("TEGRA_EXPORTER_LISTEN_PORT".to_string(), "not-a-port".to_string()),
                // Different prefix entirely: not ours.
                ("PATH".to_string(), "/usr/bin".to_string()),
            ]
            .into_iter(),
        );

        assert_eq!(config.sample_interval_seconds, Some(5));
        assert_eq!(config.telemetry_path.as_deref(), Some("/telemetry"));
        assert_eq!(
            config.utility_path,
            Some(PathBuf::from("/opt/nvidia/tegrastats"))
        );
        assert_eq!(config.port, Some(DEFAULT_PORT));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = Config::default();
        config.sample_interval_seconds = Some(0);
        assert!(validate_effective_config(&config).is_err());
    }

    #[test]
    fn relative_telemetry_path_is_rejected() {
        let mut config = Config::default();
        config.telemetry_path = Some("metrics".into());
        assert!(validate_effective_config(&config).is_err());
    }

    #[test]
    fn tls_requires_both_paths() {
        let mut config = Config::default();
        config.enable_tls = Some(true);
        config.tls_cert_path = Some("/tmp/does-not-matter.pem".into());
        assert!(validate_effective_config(&config).is_err());
    }

    #[test]
    fn backoff_ceiling_must_dominate_initial() {
        let mut config = Config::default();
        config.restart_backoff_ms = Some(5_000);
        config.restart_backoff_max_ms = Some(1_000);
        assert!(validate_effective_config(&config).is_err());
    }

    #[test]
    fn yaml_config_file_is_loaded() {
        use std::io::Write;
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(file, "port: 9999\nsample-interval-seconds: 3").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.port, Some(9999));
        assert_eq!(config.sample_interval_seconds, Some(3));
        // Unspecified keys keep their defaults.
        assert_eq!(config.telemetry_path.as_deref(), Some("/metrics"));
    }

    #[test]
    fn toml_config_file_is_loaded() {
        use std::io::Write;
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "port = 9998\nstale-after-seconds = 120").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.port, Some(9998));
        assert_eq!(config.stale_after_seconds, Some(120));
    }
}
