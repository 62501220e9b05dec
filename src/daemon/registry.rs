//! Cache of running daemons keyed by scope name.
//!
//! The registry holds at most one group of live daemons. Requesting a scope
//! that is not cached (or whose daemon died) first closes *every* cached
//! daemon, then spawns the new one. Test daemons usually contend for fixed
//! ports, so only one group runs at a time.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{Result, ShutdownTimeoutWarning};
use super::handle::{DaemonHandle, SpawnOutcome};
use super::process::ProcessState;
use super::spawner::Spawner;

/// A named daemon scope and the spawner that provides its daemon.
#[derive(Clone)]
pub struct DaemonScope {
    name: String,
    spawner: Arc<dyn Spawner>,
}

impl DaemonScope {
    #[must_use]
    pub fn new(name: impl Into<String>, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            name: name.into(),
            spawner,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for DaemonScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonScope").field("name", &self.name).finish()
    }
}

/// Owner of every live [`DaemonHandle`] in a session.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone, Default)]
pub struct ScopeRegistry {
    cells: Arc<Mutex<HashMap<String, DaemonHandle>>>,
}

impl ScopeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the daemon for `scope`, spawning it if needed.
    ///
    /// A cached daemon is reused without a new health check as long as it
    /// is healthy and its process is alive. Otherwise all cached daemons are
    /// stopped, a new one is spawned and cached, and its readiness awaited.
    ///
    /// If the caller is cancelled during the readiness wait, the starting
    /// daemon stays cached; the next request or [`ScopeRegistry::aclose`]
    /// reclaims it.
    ///
    /// The registry lock is held for the whole call, readiness wait
    /// included. Every other registry method waits until it returns.
    ///
    /// # Errors
    ///
    /// - [`super::DaemonError::Launch`] if the process cannot be started.
    /// - [`super::DaemonError::HealthCheckTimeout`] or
    ///   [`super::DaemonError::ProcessExited`] if it never became ready. The
    ///   process is stopped and evicted before the error is returned.
    pub async fn request(&self, scope: &DaemonScope) -> Result<DaemonHandle> {
        let mut cells = self.cells.lock().await;

        if let Some(handle) = cells.get(scope.name()) {
            if is_reusable(handle) {
                debug!(scope = scope.name(), id = %handle.id(), "Reusing cached daemon");
                return Ok(handle.clone());
            }
            debug!(
                scope = scope.name(),
                id = %handle.id(),
                state = %handle.state(),
                "Cached daemon is no longer usable"
            );
        }

        close_all(&mut cells).await;

        match scope.spawner.spawn(scope.name()).await? {
            SpawnOutcome::Immediate(handle) => {
                cells.insert(scope.name().to_string(), handle.clone());
                Ok(handle)
            },
            SpawnOutcome::Deferred(pending) => {
                cells.insert(scope.name().to_string(), pending.handle().clone());
                match pending.wait_ready().await {
                    Ok(handle) => Ok(handle),
                    Err(e) => {
                        if let Some(handle) = cells.remove(scope.name()) {
                            handle.aclose().await;
                        }
                        Err(e)
                    },
                }
            },
        }
    }

    /// Declare a scope whose cache entry lives as long as the returned guard.
    #[must_use]
    pub fn scope(&self, name: impl Into<String>, spawner: Arc<dyn Spawner>) -> ScopeGuard {
        ScopeGuard {
            registry: self.clone(),
            scope: DaemonScope::new(name, spawner),
            closed: false,
        }
    }

    /// Stop and evict the daemon cached under `name`, if any.
    pub async fn close_scope(&self, name: &str) -> Option<ShutdownTimeoutWarning> {
        let handle = self.cells.lock().await.remove(name)?;
        info!(scope = name, "Closing daemon scope");
        handle.aclose().await
    }

    /// Stop every cached daemon and empty the cache.
    ///
    /// Returns the warnings of daemons that could not be killed.
    pub async fn aclose(&self) -> Vec<ShutdownTimeoutWarning> {
        let mut cells = self.cells.lock().await;
        close_all(&mut cells).await
    }

    /// True if any cached daemon owns a process that is still running.
    ///
    /// Waits for an in-flight [`ScopeRegistry::request`] to finish, so it
    /// cannot observe a daemon that is still starting.
    pub async fn has_running_daemons(&self) -> bool {
        self.cells.lock().await.values().any(DaemonHandle::is_alive)
    }

    /// The handle cached under `name`, whatever its state.
    ///
    /// Like every accessor, blocks behind an in-flight request.
    pub async fn cached(&self, name: &str) -> Option<DaemonHandle> {
        self.cells.lock().await.get(name).cloned()
    }

    /// Number of cached daemons.
    pub async fn len(&self) -> usize {
        self.cells.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cells.lock().await.is_empty()
    }
}

impl fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeRegistry").finish_non_exhaustive()
    }
}

/// Detached daemons have no process to watch; their state alone decides.
fn is_reusable(handle: &DaemonHandle) -> bool {
    handle.state() == ProcessState::Healthy && (handle.is_detached() || handle.is_alive())
}

async fn close_all(cells: &mut HashMap<String, DaemonHandle>) -> Vec<ShutdownTimeoutWarning> {
    let mut warnings = Vec::new();
    for (scope, handle) in cells.drain() {
        debug!(scope = %scope, id = %handle.id(), "Closing cached daemon");
        if let Some(warning) = handle.aclose().await {
            warnings.push(warning);
        }
    }
    warnings
}

/// Scoped acquisition of a daemon.
///
/// [`ScopeGuard::request`] produces the daemon; closing or dropping the
/// guard stops it if it is still cached. Prefer [`ScopeGuard::close`]:
/// dropping can only schedule the shutdown on the current Tokio runtime.
pub struct ScopeGuard {
    registry: ScopeRegistry,
    scope: DaemonScope,
    closed: bool,
}

impl ScopeGuard {
    /// Request this scope's daemon from the registry.
    ///
    /// # Errors
    ///
    /// See [`ScopeRegistry::request`].
    pub async fn request(&self) -> Result<DaemonHandle> {
        self.registry.request(&self.scope).await
    }

    /// Stop this scope's daemon if it is still cached.
    pub async fn close(mut self) -> Option<ShutdownTimeoutWarning> {
        self.closed = true;
        self.registry.close_scope(self.scope.name()).await
    }
}

impl Deref for ScopeGuard {
    type Target = DaemonScope;

    fn deref(&self) -> &DaemonScope {
        &self.scope
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let registry = self.registry.clone();
        let name = self.scope.name().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                // Runs once any in-flight request releases the registry.
                runtime.spawn(async move {
                    registry.close_scope(&name).await;
                });
            },
            Err(_) => {
                warn!(scope = %name, "Scope dropped outside a Tokio runtime; daemon left to session teardown");
            },
        }
    }
}
