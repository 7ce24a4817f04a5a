//! Child process supervision for the tegrastats utility.
//!
//! [`Sampler::spawn`] launches tegrastats in its streaming mode and returns a
//! handle whose channel yields one [`RawLine`] per snapshot tick. The
//! supervision task owns the child for the life of the process: when the
//! child exits or its pipe breaks, the task logs the event, sleeps the
//! current backoff delay, and relaunches. Callers never see a restart; the
//! line stream simply pauses and resumes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use prometheus::IntCounter;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{
    Config, DEFAULT_RESTART_BACKOFF_MAX_MS, DEFAULT_RESTART_BACKOFF_MS,
    DEFAULT_SAMPLE_INTERVAL_SECONDS,
};
use crate::startup_checks::{resolve_utility, StartupError};

/// Bounded channel depth between the supervision task and the pipeline.
/// The pipeline drains far faster than tegrastats produces.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// One raw snapshot line, tagged with local receipt time.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub text: String,
    pub received_at: SystemTime,
}

/// Settings for launching and supervising the child process.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub utility: PathBuf,
    pub interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl SamplerConfig {
    /// Resolves the utility binary and derives child process settings from
    /// the exporter config. Fails fatally when the utility cannot be found.
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let utility = resolve_utility(config.utility_path.as_deref())?;
        Ok(Self {
            utility,
            interval: Duration::from_secs(
                config
                    .sample_interval_seconds
                    .unwrap_or(DEFAULT_SAMPLE_INTERVAL_SECONDS),
            ),
            backoff_initial: Duration::from_millis(
                config.restart_backoff_ms.unwrap_or(DEFAULT_RESTART_BACKOFF_MS),
            ),
            backoff_max: Duration::from_millis(
                config
                    .restart_backoff_max_ms
                    .unwrap_or(DEFAULT_RESTART_BACKOFF_MAX_MS),
            ),
        })
    }
}

/// Handle to the supervised line stream.
///
/// Dropping or shutting down the handle aborts the supervision task, which
/// kills the child process (`kill_on_drop`).
pub struct Sampler {
    pub lines: mpsc::Receiver<RawLine>,
    task: JoinHandle<()>,
}

impl Sampler {
    /// Starts the supervision task and returns the line stream handle.
    ///
    /// `restarts` is incremented on every relaunch so the restart rate shows
    /// up in the exporter's own telemetry.
    pub fn spawn(config: SamplerConfig, restarts: IntCounter) -> Self {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let task = tokio::spawn(supervise(config, tx, restarts));
        Self { lines: rx, task }
    }

    /// Takes the line receiver, leaving the supervision task running.
    pub fn take_lines(&mut self) -> mpsc::Receiver<RawLine> {
        let (_, empty) = mpsc::channel(1);
        std::mem::replace(&mut self.lines, empty)
    }

    /// Stops supervision and kills the child process.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

async fn supervise(config: SamplerConfig, tx: mpsc::Sender<RawLine>, restarts: IntCounter) {
    let interval_ms = config.interval.as_millis().to_string();
    let mut backoff = RestartBackoff::new(config.backoff_initial, config.backoff_max);
    let mut first_launch = true;

    loop {
        if !first_launch {
            restarts.inc();
            let delay = backoff.next_delay();
            warn!(
                "Restarting {} in {:.1}s",
                config.utility.display(),
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }
        first_launch = false;

        let mut child = match Command::new(&config.utility)
            .arg("--interval")
            .arg(&interval_ms)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch {}: {}", config.utility.display(), e);
                continue;
            }
        };

        info!(
            "Launched {} --interval {} (pid {:?})",
            config.utility.display(),
            interval_ms,
            child.id()
        );

        let Some(stdout) = child.stdout.take() else {
            warn!("Child process has no stdout pipe");
            continue;
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut healthy = false;

        loop {
            match lines.next_line().await {
                Ok(Some(text)) => {
                    if !healthy {
                        // First line from a fresh child: the launch worked,
                        // so future failures start from the initial delay.
                        backoff.reset();
                        healthy = true;
                    }
                    let line = RawLine {
                        text,
                        received_at: SystemTime::now(),
                    };
                    if tx.send(line).await.is_err() {
                        debug!("Line receiver dropped, stopping supervision");
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading child stdout: {}", e);
                    break;
                }
            }
        }

        // EOF or broken pipe both mean the same thing: the child is gone.
        match child.wait().await {
            Ok(status) => warn!("tegrastats exited with {}", status),
            Err(e) => warn!("Failed to reap child process: {}", e),
        }
    }
}

/// Exponential restart backoff with jitter and a hard ceiling.
#[derive(Debug)]
pub struct RestartBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl RestartBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Returns the delay to sleep before the next launch attempt and doubles
    /// the stored delay up to the ceiling. Jitter of +/-20% keeps a fleet of
    /// exporters from restarting in lockstep.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_secs_f64(base.as_secs_f64() * jitter).min(self.max)
    }

    /// Resets to the initial delay after a healthy run.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
