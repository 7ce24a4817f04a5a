//! `check` subcommand: verify the tegrastats utility is usable.
//!
//! Resolves the binary the same way the sampler does; with `--run` it also
//! launches the utility for one snapshot and runs the line through the
//! parser, so a deployment can be validated end to end before the service
//! is enabled.

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use crate::config::Config;
use crate::parser;
use crate::startup_checks::resolve_utility;

/// How long to wait for the first snapshot line during `check --run`.
const FIRST_LINE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn command_check(run: bool, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Checking tegrastats availability");
    println!("===================================\n");

    let utility = match resolve_utility(config.utility_path.as_deref()) {
        Ok(path) => {
            println!("✅ Utility found: {}", path.display());
            path
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(crate::startup_checks::EXIT_UTILITY_MISSING);
        }
    };

    if !run {
        println!("\nRun with --run to launch the utility and parse one snapshot.");
        return Ok(());
    }

    println!("Launching {} for one snapshot...", utility.display());

    let mut child = Command::new(&utility)
        .arg("--interval")
        .arg("1000")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| format!("Failed to launch {}: {}", utility.display(), e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or("Child process has no stdout pipe")?;

    // The reader thread lets the wait be bounded; the child is killed either
    // way once a line arrives or the timeout expires.
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        if BufReader::new(stdout).read_line(&mut line).is_ok() {
            let _ = tx.send(line);
        }
    });

    let result = rx.recv_timeout(FIRST_LINE_TIMEOUT);
    let _ = child.kill();
    let _ = child.wait();

    let line = result.map_err(|_| {
        format!(
            "No snapshot line within {}s - is this a Jetson module?",
            FIRST_LINE_TIMEOUT.as_secs()
        )
    })?;

    match parser::parse_line(&line) {
        Ok(sample) => {
            println!("✅ Parsed snapshot line:");
            if let Some(ram) = &sample.ram {
                println!("   RAM {}/{} MB", ram.used_mb, ram.total_mb);
            }
            println!("   {} CPU cores", sample.cpu_cores.len());
            println!("   {} temperature zones", sample.temperatures.len());
            println!("   {} power rails", sample.rails.len());
            println!("\n✅ Ready to export");
            Ok(())
        }
        Err(e) => Err(format!("Snapshot line did not parse ({}): {}", e, line.trim()).into()),
    }
}
