//! OS process control for daemons.
//!
//! This module starts the process described by a [`SpawnSpec`], keeps its
//! stdio streams flowing into the configured handlers and answers cheap
//! liveness questions by polling the exit status.
//!
//! ## Module Structure
//!
//! - [`output`]: stdout/stderr line forwarding
//! - [`shutdown`]: graceful signal, timeout and forced kill

mod output;
mod shutdown;

use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::error::{DaemonError, Result};
use super::signal::ShutdownSignal;
use super::spec::SpawnSpec;

pub use output::tracing_output;
pub use shutdown::terminate;

/// Lifecycle state of a daemon handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessState {
    /// Specification exists, no process yet.
    #[default]
    NotStarted,
    /// Process launched, readiness not yet confirmed.
    Starting,
    /// Health check succeeded.
    Healthy,
    /// Shutdown signal sent, waiting for exit.
    Terminating,
    /// Process exit observed (or given up on).
    Terminated,
    /// Readiness was never reached.
    Failed,
}

impl ProcessState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A launched OS process, exclusively owned by one daemon handle.
///
/// The child is spawned with `kill_on_drop`, so dropping the last handle
/// reference never leaks the process.
#[derive(Debug)]
pub struct DaemonProcess {
    child: Child,
    pid: u32,
    exit_status: Option<ExitStatus>,
    output_tasks: Vec<JoinHandle<()>>,
}

impl DaemonProcess {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Poll for exit without blocking. Returns the exit status once the
    /// process has exited; any status, including success, means "exited".
    pub fn poll_exit(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_some() {
            return self.exit_status;
        }
        match self.child.try_wait() {
            Ok(status) => {
                if let Some(status) = status {
                    info!(pid = self.pid, %status, "Daemon process exited");
                }
                self.exit_status = status;
                status
            },
            Err(e) => {
                warn!(pid = self.pid, error = %e, "Failed to poll daemon process status");
                None
            },
        }
    }

    /// Exit code if the process exited normally.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|status| status.code())
    }

    /// Deliver `signal` to the process.
    ///
    /// Without POSIX signals the process is killed outright.
    pub fn send_signal(&mut self, signal: ShutdownSignal) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            let raw = i32::try_from(self.pid)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
            kill(Pid::from_raw(raw), signal.to_nix()).map_err(io::Error::from)
        }
        #[cfg(not(unix))]
        {
            let _ = signal;
            self.child.start_kill()
        }
    }

    /// Forcefully kill the process (SIGKILL on unix).
    pub fn force_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    /// Number of stdio forwarding tasks still running.
    #[must_use]
    pub fn active_output_streams(&self) -> usize {
        self.output_tasks.iter().filter(|t| !t.is_finished()).count()
    }
}

/// Launch the process described by `spec`.
///
/// Returns as soon as the OS has created the process; readiness is the
/// health checker's job. Streams with a configured handler are piped and
/// forwarded line by line for as long as the process lives; the others are
/// inherited from the test runner.
///
/// # Errors
///
/// Returns [`DaemonError::Launch`] if the executable cannot be started.
pub fn start_process(spec: &SpawnSpec) -> Result<DaemonProcess> {
    let program = spec.program();
    let mut command = Command::new(program);
    command
        .args(&spec.command()[1..])
        .envs(spec.env())
        .stdin(Stdio::null())
        .stdout(stdio_for(spec.stdout_handler().is_some()))
        .stderr(stdio_for(spec.stderr_handler().is_some()))
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| DaemonError::launch(program, e))?;

    let pid = child.id().ok_or_else(|| {
        DaemonError::launch(
            program,
            io::Error::other("process was reaped before its pid could be read"),
        )
    })?;

    let mut output_tasks = Vec::new();
    if let Some(handler) = spec.stdout_handler()
        && let Some(stdout) = child.stdout.take()
    {
        output_tasks.push(output::forward_lines(stdout, handler.clone(), "stdout", pid));
    }
    if let Some(handler) = spec.stderr_handler()
        && let Some(stderr) = child.stderr.take()
    {
        output_tasks.push(output::forward_lines(stderr, handler.clone(), "stderr", pid));
    }

    info!(pid, command = %spec.command().join(" "), "Started daemon process");

    Ok(DaemonProcess {
        child,
        pid,
        exit_status: None,
        output_tasks,
    })
}

fn stdio_for(piped: bool) -> Stdio {
    if piped { Stdio::piped() } else { Stdio::inherit() }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    fn sh(script: &str) -> crate::daemon::spec::SpawnSpecBuilder {
        SpawnSpec::builder(["/bin/sh", "-c", script]).health_check_fn(|_probe| async { anyhow::Ok(true) })
    }

    async fn wait_exit(process: &mut DaemonProcess) -> ExitStatus {
        for _ in 0..200 {
            if let Some(status) = process.poll_exit() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("process did not exit");
    }

    #[tokio::test]
    async fn test_start_process_reports_pid_and_exit() {
        let spec = sh("exit 3").build().unwrap();
        let mut process = start_process(&spec).unwrap();
        assert!(process.pid() > 0);

        let status = wait_exit(&mut process).await;
        assert_eq!(status.code(), Some(3));
        assert_eq!(process.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_zero_exit_still_counts_as_exited() {
        let spec = sh("true").build().unwrap();
        let mut process = start_process(&spec).unwrap();
        let status = wait_exit(&mut process).await;
        assert!(status.success());
        assert!(process.poll_exit().is_some());
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let spec = SpawnSpec::builder(["/nonexistent/testd-binary"])
            .health_check_fn(|_probe| async { anyhow::Ok(true) })
            .build()
            .unwrap();
        let err = start_process(&spec).unwrap_err();
        assert!(matches!(err, DaemonError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_env_and_stdout_forwarding() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let spec = sh("echo \"greeting=$TESTD_GREETING\"; echo oops >&2")
            .env("TESTD_GREETING", "hello")
            .stdout_handler(Arc::new(move |line: &str| sink.lock().push(line.to_string())))
            .build()
            .unwrap();

        let mut process = start_process(&spec).unwrap();
        wait_exit(&mut process).await;
        for _ in 0..100 {
            if process.active_output_streams() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(*lines.lock(), vec!["greeting=hello".to_string()]);
    }

    #[tokio::test]
    async fn test_send_signal_terminates_sleeping_process() {
        let spec = sh("exec sleep 30").build().unwrap();
        let mut process = start_process(&spec).unwrap();
        assert!(process.poll_exit().is_none());

        process.send_signal(ShutdownSignal::Terminate).unwrap();
        let status = wait_exit(&mut process).await;
        assert!(!status.success());
        assert_eq!(process.exit_code(), None);
    }
}
