//! Per-test daemon request gate.
//!
//! A test may depend on a single daemon scope. The [`RequestGate`] records
//! the scopes one test requested and turns a second, different scope into
//! [`DaemonError::MultipleScopeRequest`] instead of silently replacing the
//! first daemon mid-test.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::error::{DaemonError, Result};
use super::handle::DaemonHandle;
use super::registry::{DaemonScope, ScopeRegistry};

/// Hook into the test harness output capture.
///
/// In external-wait mode capture is suspended while waiting, so the banner
/// telling the developer what to start is actually visible.
pub trait CaptureControl: Send + Sync {
    fn suspend(&self);
    fn resume(&self);
}

/// No output capture to manage.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

impl CaptureControl for NoCapture {
    fn suspend(&self) {}
    fn resume(&self) {}
}

/// Resumes capture when dropped, including on error and cancellation.
struct SuspendedCapture<'a>(&'a dyn CaptureControl);

impl<'a> SuspendedCapture<'a> {
    fn new(capture: &'a dyn CaptureControl) -> Self {
        capture.suspend();
        Self(capture)
    }
}

impl Drop for SuspendedCapture<'_> {
    fn drop(&mut self) {
        self.0.resume();
    }
}

/// Daemon access for one test.
pub struct RequestGate {
    registry: ScopeRegistry,
    requested: BTreeSet<String>,
    external_wait: bool,
    capture: Arc<dyn CaptureControl>,
}

impl RequestGate {
    #[must_use]
    pub fn new(registry: ScopeRegistry, external_wait: bool, capture: Arc<dyn CaptureControl>) -> Self {
        Self {
            registry,
            requested: BTreeSet::new(),
            external_wait,
            capture,
        }
    }

    /// Request the daemon of `scope` for this test.
    ///
    /// Requesting the same scope again is allowed and reuses the daemon.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::MultipleScopeRequest`] if this test already requested
    ///   a different scope. The registry is not touched in that case.
    /// - Anything [`ScopeRegistry::request`] returns.
    pub async fn request(&mut self, scope: &DaemonScope) -> Result<DaemonHandle> {
        if !self.requested.contains(scope.name()) && !self.requested.is_empty() {
            let mut scopes: Vec<String> = self.requested.iter().cloned().collect();
            scopes.push(scope.name().to_string());
            return Err(DaemonError::MultipleScopeRequest { scopes });
        }
        self.requested.insert(scope.name().to_string());

        if self.external_wait {
            let _suspended = SuspendedCapture::new(self.capture.as_ref());
            return self.registry.request(scope).await;
        }
        self.registry.request(scope).await
    }

    /// Scopes requested through this gate so far.
    pub fn requested_scopes(&self) -> impl Iterator<Item = &str> {
        self.requested.iter().map(String::as_str)
    }
}
