//! Shared run-control state: child pids, timeout flags, interrupt flag.
//!
//! One slot per thread (slot 0 is the main thread, slots 1..=N the
//! solver workers).  The watchdog armed around each child run kills
//! the recorded pid on expiry and marks the slot, which is how a
//! timeout is later told apart from a genuine crash.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use nix::sys::signal::{kill, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

/// Per-thread child bookkeeping plus the process-wide interrupt flag.
pub struct Monitor {
    /// Pid of the child currently running in each slot; 0 = none.
    child_pids: Vec<AtomicI32>,
    /// Set by the watchdog when it killed the slot's child.
    killed: Vec<AtomicBool>,
    /// Set by SIGINT; checked at iteration boundaries.
    interrupted: Arc<AtomicBool>,
}

impl Monitor {
    /// Create a monitor with `workers` worker slots (plus the main
    /// slot 0).
    pub fn new(workers: usize) -> Arc<Self> {
        let slots = workers + 1;
        Arc::new(Self {
            child_pids: (0..slots).map(|_| AtomicI32::new(0)).collect(),
            killed: (0..slots).map(|_| AtomicBool::new(false)).collect(),
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Install process-wide signal handling: SIGINT raises the
    /// interrupt flag, SIGPIPE is ignored so that a lost coordinator
    /// surfaces as an I/O error instead of killing the process.
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&self.interrupted))?;
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        unsafe { nix::sys::signal::sigaction(Signal::SIGPIPE, &ignore) }
            .map_err(std::io::Error::from)?;
        Ok(())
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Record the child running in `slot`.
    pub fn set_child(&self, slot: usize, pid: u32) {
        self.child_pids[slot].store(pid as i32, Ordering::SeqCst);
    }

    /// Clear the slot after the child has been reaped.
    pub fn clear_child(&self, slot: usize) {
        self.child_pids[slot].store(0, Ordering::SeqCst);
    }

    /// Reset and return the slot's killed-by-watchdog flag.
    pub fn take_killed(&self, slot: usize) -> bool {
        self.killed[slot].swap(false, Ordering::SeqCst)
    }

    /// SIGKILL the child recorded in `slot`, marking it killed.
    pub fn kill_child(&self, slot: usize) {
        let pid = self.child_pids[slot].load(Ordering::SeqCst);
        if pid <= 0 {
            return;
        }
        self.killed[slot].store(true, Ordering::SeqCst);
        debug!("killing child {pid} in slot {slot}");
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
            warn!("failed to kill child {pid}: {e}");
        }
    }

    /// SIGKILL every recorded child.  Used on interrupt.
    pub fn kill_all_children(&self) {
        for slot in 0..self.child_pids.len() {
            self.kill_child(slot);
        }
    }

    /// Arm a watchdog for `slot`.  After `timeout` the watchdog sets
    /// the slot's killed flag and SIGKILLs the recorded child.
    /// Dropping the returned guard disarms it.  `None` suppresses the
    /// watchdog entirely.
    pub fn arm_watchdog(self: &Arc<Self>, slot: usize, timeout: Option<Duration>) -> WatchdogGuard {
        let Some(timeout) = timeout else {
            return WatchdogGuard { cancel: None };
        };
        let (cancel, expired) = mpsc::channel::<()>();
        let monitor = Arc::clone(self);
        thread::spawn(move || {
            if expired.recv_timeout(timeout).is_err() {
                debug!("watchdog expired for slot {slot} after {timeout:?}");
                monitor.kill_child(slot);
            }
        });
        WatchdogGuard {
            cancel: Some(cancel),
        }
    }
}

/// Disarms the watchdog on drop.
pub struct WatchdogGuard {
    cancel: Option<mpsc::Sender<()>>,
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            // The watchdog may already have fired; that is fine.
            let _ = cancel.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_start_clear() {
        let monitor = Monitor::new(2);
        assert!(!monitor.take_killed(0));
        assert!(!monitor.take_killed(2));
        assert!(!monitor.interrupted());
    }

    #[test]
    fn take_killed_resets_flag() {
        let monitor = Monitor::new(0);
        monitor.killed[0].store(true, Ordering::SeqCst);
        assert!(monitor.take_killed(0));
        assert!(!monitor.take_killed(0));
    }

    #[test]
    fn kill_child_without_recorded_pid_is_noop() {
        let monitor = Monitor::new(0);
        monitor.kill_child(0);
        assert!(!monitor.take_killed(0));
    }

    #[test]
    fn disarmed_watchdog_does_not_fire() {
        let monitor = Monitor::new(0);
        let guard = monitor.arm_watchdog(0, Some(Duration::from_millis(20)));
        drop(guard);
        thread::sleep(Duration::from_millis(60));
        assert!(!monitor.take_killed(0));
    }

    #[test]
    fn suppressed_watchdog_never_arms() {
        let monitor = Monitor::new(0);
        let _guard = monitor.arm_watchdog(0, None);
        thread::sleep(Duration::from_millis(10));
        assert!(!monitor.take_killed(0));
    }
}
