//! Bounded-timeout subprocess execution.
//!
//! All external collaborators (package registry, package installer, CDS
//! compiler) are blocking subprocess calls. A hung command must surface as
//! an ordinary failure, never wedge the whole run, so every invocation goes
//! through [`run_with_timeout`].

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a configured command, killing it when `timeout` elapses.
///
/// A timeout or spawn failure is an `Err`; a non-zero exit is a successful
/// `Ok` with `success == false` so callers can attach their own context.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<CommandOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn command {:?}", command.get_program()))?;

    // Drain pipes on separate threads so a chatty child cannot deadlock
    // against a full pipe while we poll for exit.
    let stdout_reader = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = pipe.read_to_string(&mut buffer);
            buffer
        })
    });
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = pipe.read_to_string(&mut buffer);
            buffer
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().context("Failed to poll child process")? {
            Some(status) => break status,
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!("Command timed out after {}s", timeout.as_secs());
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    };

    let stdout = stdout_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    Ok(CommandOutput {
        success: status.success(),
        stdout,
        stderr,
    })
}
