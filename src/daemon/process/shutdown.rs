//! Daemon shutdown with escalation.
//!
//! The configured signal is sent first. If the process is still alive when
//! the timeout expires it is killed, and if even that does not stop it
//! within [`KILL_GRACE_PERIOD`] the handle is marked terminated anyway and a
//! [`ShutdownTimeoutWarning`] is reported. Teardown never blocks forever.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{DaemonProcess, ProcessState};
use crate::constants::{KILL_GRACE_PERIOD, SHUTDOWN_POLL_INTERVAL};
use crate::daemon::error::ShutdownTimeoutWarning;
use crate::daemon::handle::DaemonHandle;
use crate::daemon::signal::ShutdownSignal;

/// Stop the daemon behind `handle`.
///
/// Idempotent: a handle that is already [`ProcessState::Terminated`] is
/// left untouched. Handles without a process are simply marked terminated.
///
/// Returns a warning if the process survived the forced kill.
pub async fn terminate(
    handle: &DaemonHandle,
    signal: ShutdownSignal,
    timeout: Duration,
) -> Option<ShutdownTimeoutWarning> {
    if handle.state() == ProcessState::Terminated {
        return None;
    }
    let Some(process) = handle.process() else {
        handle.set_state(ProcessState::Terminated);
        return None;
    };

    handle.set_state(ProcessState::Terminating);
    let pid = {
        let mut process = process.lock();
        if process.poll_exit().is_none() {
            debug!(scope = %handle.scope(), pid = process.pid(), %signal, "Sending shutdown signal");
            if let Err(e) = process.send_signal(signal) {
                warn!(
                    scope = %handle.scope(),
                    pid = process.pid(),
                    %signal,
                    error = %e,
                    "Failed to send shutdown signal"
                );
            }
        }
        process.pid()
    };

    if wait_for_exit(process, timeout).await {
        info!(scope = %handle.scope(), pid, "Daemon stopped");
        handle.set_state(ProcessState::Terminated);
        return None;
    }

    warn!(
        scope = %handle.scope(),
        pid,
        %signal,
        timeout_ms = timeout.as_millis() as u64,
        "Daemon ignored shutdown signal, killing it"
    );
    if let Err(e) = process.lock().force_kill() {
        warn!(scope = %handle.scope(), pid, error = %e, "Failed to kill daemon");
    }

    let killed = wait_for_exit(process, KILL_GRACE_PERIOD).await;
    finish_after_kill(handle, pid, signal, timeout, killed)
}

/// Last step of escalation. The handle ends up terminated either way.
fn finish_after_kill(
    handle: &DaemonHandle,
    pid: u32,
    signal: ShutdownSignal,
    timeout: Duration,
    killed: bool,
) -> Option<ShutdownTimeoutWarning> {
    let warning = if killed {
        info!(scope = %handle.scope(), pid, "Daemon killed");
        None
    } else {
        let warning = ShutdownTimeoutWarning {
            scope: handle.scope().to_string(),
            pid,
            signal,
            timeout,
        };
        warn!(%warning, "Giving up on daemon shutdown");
        Some(warning)
    };
    handle.set_state(ProcessState::Terminated);
    warning
}

/// Poll liveness until the process exits or `timeout` elapses.
async fn wait_for_exit(process: &Mutex<DaemonProcess>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if process.lock().poll_exit().is_some() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(SHUTDOWN_POLL_INTERVAL.min(deadline - now)).await;
    }
}
