//! Startup requirement validation for tegrastats-exporter.
//!
//! The one hard requirement is a runnable tegrastats binary. A missing or
//! non-executable utility is unrecoverable: there is nothing to restart, so
//! it is surfaced as a fatal startup error instead of entering the
//! supervision loop.

use std::path::{Path, PathBuf};
use tracing::info;

/// Exit code for a missing or non-executable diagnostics utility,
/// distinguished from generic internal failures (exit code 1).
pub const EXIT_UTILITY_MISSING: i32 = 2;

/// Binary name searched on $PATH when no explicit path is configured.
pub const UTILITY_NAME: &str = "tegrastats";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("diagnostics utility '{0}' not found (searched $PATH; set utility_path to override)")]
    UtilityNotFound(String),

    #[error("diagnostics utility {0} exists but is not executable")]
    UtilityNotExecutable(PathBuf),
}

/// Resolves the tegrastats binary, either from an explicit configured path
/// or by searching $PATH.
pub fn resolve_utility(explicit: Option<&Path>) -> Result<PathBuf, StartupError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(StartupError::UtilityNotFound(path.display().to_string()));
        }
        if !is_executable(path) {
            return Err(StartupError::UtilityNotExecutable(path.to_path_buf()));
        }
        info!("Using configured diagnostics utility: {}", path.display());
        return Ok(path.to_path_buf());
    }

    let search_path = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&search_path) {
        let candidate = dir.join(UTILITY_NAME);
        if candidate.exists() && is_executable(&candidate) {
            info!("Found diagnostics utility: {}", candidate.display());
            return Ok(candidate);
        }
    }

    Err(StartupError::UtilityNotFound(UTILITY_NAME.to_string()))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
