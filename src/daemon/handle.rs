//! Runtime handles for spawned daemons.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::error::{Result, ShutdownTimeoutWarning};
use super::health::HealthChecker;
use super::process::{DaemonProcess, ProcessState, terminate};
use super::signal::ShutdownSignal;

/// How a daemon is asked to stop when its handle is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    pub signal: ShutdownSignal,
    pub timeout: Duration,
}

impl ShutdownPolicy {
    #[must_use]
    pub const fn new(signal: ShutdownSignal, timeout: Duration) -> Self {
        Self { signal, timeout }
    }
}

/// Shared handle to one daemon instance.
///
/// Clones refer to the same instance; [`DaemonHandle::id`] identifies it.
/// A handle either owns an OS process or is *detached* (spawning disabled,
/// or the service was started by hand outside the test run).
#[derive(Clone)]
pub struct DaemonHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: Uuid,
    scope: String,
    pid: Option<u32>,
    process: Option<Mutex<DaemonProcess>>,
    state: Mutex<ProcessState>,
    shutdown: ShutdownPolicy,
}

impl DaemonHandle {
    /// Wrap a freshly launched process. The handle starts in
    /// [`ProcessState::Starting`].
    pub fn launched(scope: impl Into<String>, process: DaemonProcess, shutdown: ShutdownPolicy) -> Self {
        Self::build(
            scope.into(),
            Some(process),
            ProcessState::Starting,
            shutdown,
        )
    }

    /// Handle without an OS process.
    pub fn detached(scope: impl Into<String>, state: ProcessState, shutdown: ShutdownPolicy) -> Self {
        Self::build(scope.into(), None, state, shutdown)
    }

    fn build(
        scope: String,
        process: Option<DaemonProcess>,
        state: ProcessState,
        shutdown: ShutdownPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                scope,
                pid: process.as_ref().map(DaemonProcess::pid),
                process: process.map(Mutex::new),
                state: Mutex::new(state),
                shutdown,
            }),
        }
    }

    /// Unique identity of this instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Scope key this daemon was spawned for.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        *self.inner.state.lock()
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), state);
        if previous != state {
            debug!(scope = %self.scope(), id = %self.id(), from = %previous, to = %state, "Daemon state changed");
        }
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.process.is_none()
    }

    /// Cheap liveness probe: polls the exit status, never talks to the
    /// service. Detached handles have no process and report `false`.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner
            .process
            .as_ref()
            .is_some_and(|process| process.lock().poll_exit().is_none())
    }

    /// Exit code once the process has exited normally.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.inner
            .process
            .as_ref()
            .and_then(|process| process.lock().exit_code())
    }

    #[must_use]
    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        self.inner.shutdown
    }

    /// Whether both handles refer to the same daemon instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }

    pub(crate) fn process(&self) -> Option<&Mutex<DaemonProcess>> {
        self.inner.process.as_ref()
    }

    /// Stop the daemon using its shutdown policy.
    pub async fn aclose(&self) -> Option<ShutdownTimeoutWarning> {
        let policy = self.inner.shutdown;
        terminate(self, policy.signal, policy.timeout).await
    }
}

impl fmt::Debug for DaemonHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonHandle")
            .field("id", &self.inner.id)
            .field("scope", &self.inner.scope)
            .field("pid", &self.inner.pid)
            .field("state", &self.state())
            .finish()
    }
}

/// A daemon whose process exists but whose readiness is still pending.
#[derive(Debug)]
pub struct PendingDaemon {
    handle: DaemonHandle,
    checker: HealthChecker,
}

impl PendingDaemon {
    #[must_use]
    pub fn new(handle: DaemonHandle, checker: HealthChecker) -> Self {
        Self { handle, checker }
    }

    /// The not-yet-ready handle. Only the registry may cache it.
    #[must_use]
    pub fn handle(&self) -> &DaemonHandle {
        &self.handle
    }

    /// Wait until the health checker accepts the daemon.
    ///
    /// # Errors
    ///
    /// Propagates [`super::DaemonError::HealthCheckTimeout`] and
    /// [`super::DaemonError::ProcessExited`]. The process is *not*
    /// terminated here; the caller owns cleanup.
    pub async fn wait_ready(self) -> Result<DaemonHandle> {
        self.checker.wait_ready(&self.handle).await?;
        Ok(self.handle)
    }
}

/// What a spawner produced.
#[derive(Debug)]
pub enum SpawnOutcome {
    /// Usable right away.
    Immediate(DaemonHandle),
    /// Launched; readiness must be awaited before handing it out.
    Deferred(PendingDaemon),
}

impl SpawnOutcome {
    #[must_use]
    pub fn handle(&self) -> &DaemonHandle {
        match self {
            Self::Immediate(handle) => handle,
            Self::Deferred(pending) => pending.handle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ShutdownPolicy {
        ShutdownPolicy::new(ShutdownSignal::Terminate, Duration::from_secs(1))
    }

    #[test]
    fn test_detached_handle() {
        let handle = DaemonHandle::detached("svc", ProcessState::Healthy, policy());
        assert!(handle.is_detached());
        assert!(!handle.is_alive());
        assert_eq!(handle.pid(), None);
        assert_eq!(handle.exit_code(), None);
        assert_eq!(handle.scope(), "svc");
        assert_eq!(handle.state(), ProcessState::Healthy);
    }

    #[test]
    fn test_identity_is_shared_by_clones() {
        let a = DaemonHandle::detached("svc", ProcessState::Healthy, policy());
        let b = DaemonHandle::detached("svc", ProcessState::Healthy, policy());
        let a2 = a.clone();

        assert!(a.same_instance(&a2));
        assert!(!a.same_instance(&b));

        a.set_state(ProcessState::Terminated);
        assert_eq!(a2.state(), ProcessState::Terminated);
    }

    #[test]
    fn test_spawn_outcome_exposes_handle() {
        let handle = DaemonHandle::detached("svc", ProcessState::Healthy, policy());
        let outcome = SpawnOutcome::Immediate(handle.clone());
        assert!(outcome.handle().same_instance(&handle));
    }
}
