//! Scoped execution of external tools with capture and timeout.
//!
//! Spawns one child (tracer, checker or solver invocation), redirects
//! its stdout/stderr into caller-owned temp files, records its pid in
//! the monitor slot for the calling thread, and waits under an
//! optional watchdog.  A signal death while the watchdog flag is set
//! classifies as a timeout rather than a crash.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::monitor::Monitor;

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by the given signal, not at the watchdog's hand.
    Crashed(i32),
    /// Killed by the watchdog (or died under its flag).
    TimedOut,
}

impl RunStatus {
    pub fn success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }
}

/// Captured stdout/stderr of a finished child.  The temp files are
/// deleted on drop unless read or persisted first.
pub struct RunArtifacts {
    pub stdout: NamedTempFile,
    pub stderr: NamedTempFile,
}

impl RunArtifacts {
    /// Read the captured stdout as (lossy) text.
    pub fn stdout_text(&self) -> std::io::Result<String> {
        Ok(String::from_utf8_lossy(&std::fs::read(self.stdout.path())?).into_owned())
    }

    /// Read the captured stderr as (lossy) text.
    pub fn stderr_text(&self) -> std::io::Result<String> {
        Ok(String::from_utf8_lossy(&std::fs::read(self.stderr.path())?).into_owned())
    }
}

/// Errors spawning or reaping a child.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {argv0}: {source}")]
    Spawn {
        argv0: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error around child execution: {0}")]
    Io(#[from] std::io::Error),
}

/// Run `argv` to completion in `workdir`.
///
/// The child's pid is published to `monitor` slot `slot` for the
/// duration of the wait so the watchdog (and the interrupt path) can
/// kill it.  `timeout == None` suppresses the watchdog.
pub fn run_child(
    monitor: &Arc<Monitor>,
    argv: &[String],
    workdir: &Path,
    timeout: Option<Duration>,
    slot: usize,
) -> Result<(RunStatus, RunArtifacts), RunError> {
    assert!(!argv.is_empty(), "empty argv");
    let stdout = NamedTempFile::new_in(workdir)?;
    let stderr = NamedTempFile::new_in(workdir)?;

    debug!("slot {slot}: running {argv:?}");
    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout.reopen()?))
        .stderr(Stdio::from(stderr.reopen()?))
        .spawn()
        .map_err(|source| RunError::Spawn {
            argv0: argv[0].clone(),
            source,
        })?;

    // A stale flag from a watchdog that lost the race on the previous
    // run in this slot must not taint this classification.
    monitor.take_killed(slot);
    monitor.set_child(slot, child.id());
    let watchdog = monitor.arm_watchdog(slot, timeout);

    let status = child.wait();
    drop(watchdog);
    monitor.clear_child(slot);
    let status = status?;

    let outcome = match status.signal() {
        Some(sig) => {
            if monitor.take_killed(slot) {
                RunStatus::TimedOut
            } else {
                RunStatus::Crashed(sig)
            }
        }
        None => {
            monitor.take_killed(slot);
            RunStatus::Exited(status.code().unwrap_or(-1))
        }
    };
    debug!("slot {slot}: {} finished: {outcome:?}", argv[0]);
    Ok((outcome, RunArtifacts { stdout, stderr }))
}
