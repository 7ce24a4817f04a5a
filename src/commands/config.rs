//! `config` subcommand: generate a configuration file.

use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

const COMMENT_HEADER: &str = "\
# tegrastats-exporter configuration
#
# Precedence: CLI flags > TEGRA_EXPORTER_* environment > this file > defaults.
#
#   port                      HTTP listen port
#   bind                      listen address
#   telemetry-path            scrape path (must start with '/')
#   sample-interval-seconds   tegrastats snapshot cadence
#   utility-path              explicit tegrastats binary ($PATH searched when unset)
#   stale-after-seconds       threshold for flagging unwritten series
#   restart-backoff-ms        initial child restart delay
#   restart-backoff-max-ms    child restart delay ceiling
";

pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let rendered = render_config(&Config::default(), &format)?;

    // TOML and YAML share the '#' comment syntax; JSON has none.
    let body = if commented && !matches!(format, ConfigFormat::Json) {
        format!("{COMMENT_HEADER}\n{rendered}")
    } else {
        rendered
    };

    match output {
        Some(path) => {
            std::fs::write(&path, body)
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            println!("✅ Config written to {}", path.display());
        }
        None => print!("{body}"),
    }

    Ok(())
}
