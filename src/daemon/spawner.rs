//! Spawners turn a scope request into a daemon.
//!
//! [`ServiceSpawnerFactory`] builds a [`ServiceSpawner`] for a [`SpawnSpec`]
//! according to the session configuration:
//!
//! | Mode | Process | Outcome |
//! |------|---------|---------|
//! | launch | started | deferred until healthy |
//! | disabled | none | immediately ready |
//! | external wait | started by hand | deferred until healthy |

use std::sync::{Arc, Once};

use async_trait::async_trait;
use tracing::{info, warn};

use super::error::Result;
use super::handle::{DaemonHandle, PendingDaemon, ShutdownPolicy, SpawnOutcome};
use super::health::HealthChecker;
use super::process::{ProcessState, start_process};
use super::spec::SpawnSpec;
use crate::config::SessionConfig;
use crate::ui;

/// Produces daemons for the registry.
///
/// Implementations only create the daemon; the registry owns readiness
/// waiting for [`SpawnOutcome::Deferred`] results and all later shutdown.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Create a daemon for the scope named `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`super::DaemonError::Launch`] if the process cannot be started.
    async fn spawn(&self, scope: &str) -> Result<SpawnOutcome>;
}

/// How daemons are provided in this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpawnMode {
    /// Start the process and wait for it to become healthy.
    #[default]
    Launch,
    /// Never start anything; every daemon is a ready dummy.
    Disabled,
    /// The developer starts the process by hand; only poll readiness.
    ExternalWait,
}

impl SpawnMode {
    /// Mode selected by the session configuration. Disabling wins over
    /// waiting, although validation rejects that combination.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        if config.service_disable {
            Self::Disabled
        } else if config.service_wait {
            Self::ExternalWait
        } else {
            Self::Launch
        }
    }
}

/// Spawner for one [`SpawnSpec`].
#[derive(Debug, Clone)]
pub struct ServiceSpawner {
    spec: SpawnSpec,
    mode: SpawnMode,
    checker: HealthChecker,
    shutdown: ShutdownPolicy,
}

impl ServiceSpawner {
    #[must_use]
    pub fn new(spec: SpawnSpec, mode: SpawnMode, client: reqwest::Client, shutdown: ShutdownPolicy) -> Self {
        let checker = HealthChecker::from_spec(&spec, client);
        Self {
            spec,
            mode,
            checker,
            shutdown,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &SpawnSpec {
        &self.spec
    }

    #[must_use]
    pub fn mode(&self) -> SpawnMode {
        self.mode
    }

    #[must_use]
    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        self.shutdown
    }
}

#[async_trait]
impl Spawner for ServiceSpawner {
    async fn spawn(&self, scope: &str) -> Result<SpawnOutcome> {
        match self.mode {
            SpawnMode::Disabled => {
                info!(scope, "Daemon spawning disabled, using a dummy");
                Ok(SpawnOutcome::Immediate(DaemonHandle::detached(
                    scope,
                    ProcessState::Healthy,
                    self.shutdown,
                )))
            },
            SpawnMode::ExternalWait => {
                ui::print_wait_banner(scope, self.spec.command(), &self.spec.health_check().describe());
                info!(scope, "Waiting for externally started daemon");
                let handle = DaemonHandle::detached(scope, ProcessState::Starting, self.shutdown);
                Ok(SpawnOutcome::Deferred(PendingDaemon::new(handle, self.checker.clone())))
            },
            SpawnMode::Launch => {
                let process = start_process(&self.spec)?;
                let pid = process.pid();
                info!(scope, pid, "Waiting for daemon readiness");

                let handle = DaemonHandle::launched(scope, process, self.shutdown);
                if let Some(setup) = self.spec.setup_service() {
                    setup(pid);
                }
                Ok(SpawnOutcome::Deferred(PendingDaemon::new(handle, self.checker.clone())))
            },
        }
    }
}

/// Creates spawners bound to the session configuration and HTTP client.
#[derive(Debug, Clone)]
pub struct ServiceSpawnerFactory {
    config: Arc<SessionConfig>,
    client: reqwest::Client,
}

impl ServiceSpawnerFactory {
    #[must_use]
    pub fn new(config: Arc<SessionConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    #[must_use]
    pub fn mode(&self) -> SpawnMode {
        SpawnMode::from_config(&self.config)
    }

    /// Shutdown policy for `spec`: its own overrides, else the session's.
    #[must_use]
    pub fn shutdown_policy(&self, spec: &SpawnSpec) -> ShutdownPolicy {
        ShutdownPolicy::new(
            spec.shutdown_signal().unwrap_or(self.config.shutdown_signal),
            spec.shutdown_timeout().unwrap_or(self.config.shutdown_timeout),
        )
    }

    #[must_use]
    pub fn service_spawner(&self, spec: SpawnSpec) -> ServiceSpawner {
        let shutdown = self.shutdown_policy(&spec);
        ServiceSpawner::new(spec, self.mode(), self.client.clone(), shutdown)
    }

    #[must_use]
    pub fn create(&self, spec: SpawnSpec) -> Arc<dyn Spawner> {
        Arc::new(self.service_spawner(spec))
    }
}

static LEGACY_WARNING: Once = Once::new();

/// Spawner built from the old factory-returning-spawner shape.
///
/// Every spawn asks `make` for a fresh spawner and delegates to it.
pub struct LegacySpawner {
    make: Box<dyn Fn() -> Arc<dyn Spawner> + Send + Sync>,
}

#[async_trait]
impl Spawner for LegacySpawner {
    async fn spawn(&self, scope: &str) -> Result<SpawnOutcome> {
        let spawner = (self.make)();
        spawner.spawn(scope).await
    }
}

/// Adapt a factory that returns spawners to the [`Spawner`] interface.
///
/// Deprecated shape: logs a warning the first time it is used in a process.
/// Pass a spawner from [`ServiceSpawnerFactory::create`] instead.
pub fn legacy_spawner<F>(make: F) -> Arc<dyn Spawner>
where
    F: Fn() -> Arc<dyn Spawner> + Send + Sync + 'static,
{
    LEGACY_WARNING.call_once(|| {
        warn!(
            "Factory-returning spawners are deprecated; \
             pass a spawner from ServiceSpawnerFactory::create instead"
        );
    });
    Arc::new(LegacySpawner { make: Box::new(make) })
}
