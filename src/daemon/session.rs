//! Explicit per-session context.
//!
//! A [`DaemonSession`] is created when a test session starts and shut down
//! when it ends. It owns the configuration, the shared HTTP client and the
//! [`ScopeRegistry`]; everything that needs daemons gets it by reference.

use std::sync::Arc;

use tracing::{info, warn};

use super::error::{Result, ShutdownTimeoutWarning};
use super::gate::{CaptureControl, NoCapture, RequestGate};
use super::registry::{ScopeGuard, ScopeRegistry};
use super::spawner::{ServiceSpawnerFactory, SpawnMode, Spawner};
use super::spec::SpawnSpec;
use crate::client::{self, ClientOptions, ServiceClient};
use crate::config::SessionConfig;

/// Idle ping connections kept per daemon.
const PING_POOL_IDLE_PER_HOST: usize = 1;

/// Daemon state of one test session.
#[derive(Debug)]
pub struct DaemonSession {
    config: Arc<SessionConfig>,
    client: reqwest::Client,
    registry: ScopeRegistry,
    factory: ServiceSpawnerFactory,
}

impl DaemonSession {
    /// Start a session.
    ///
    /// # Errors
    ///
    /// Returns [`super::DaemonError::HttpClient`] if the shared HTTP client
    /// cannot be built.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let config = Arc::new(config);
        // Pings go to local daemons; a proxy from the environment would
        // only get in the way.
        let client = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(PING_POOL_IDLE_PER_HOST)
            .build()?;
        let factory = ServiceSpawnerFactory::new(config.clone(), client.clone());

        info!(mode = ?SpawnMode::from_config(&config), "Daemon session started");
        Ok(Self {
            config,
            client,
            registry: ScopeRegistry::new(),
            factory,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ScopeRegistry {
        &self.registry
    }

    #[must_use]
    pub fn spawner_factory(&self) -> &ServiceSpawnerFactory {
        &self.factory
    }

    /// HTTP client shared by health checks.
    #[must_use]
    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Declare a daemon scope served by `spawner`.
    #[must_use]
    pub fn register_daemon_scope(&self, name: impl Into<String>, spawner: Arc<dyn Spawner>) -> ScopeGuard {
        self.registry.scope(name, spawner)
    }

    /// Declare a daemon scope for `spec`, named after it.
    #[must_use]
    pub fn create_daemon_scope(&self, spec: SpawnSpec) -> ScopeGuard {
        let name = spec.scope_name();
        self.registry.scope(name, self.factory.create(spec))
    }

    /// Gate for one test, with no output capture to manage.
    #[must_use]
    pub fn request_gate(&self) -> RequestGate {
        self.request_gate_with_capture(Arc::new(NoCapture))
    }

    /// Gate for one test that suspends `capture` in external-wait mode.
    #[must_use]
    pub fn request_gate_with_capture(&self, capture: Arc<dyn CaptureControl>) -> RequestGate {
        RequestGate::new(self.registry.clone(), self.config.service_wait, capture)
    }

    /// Client for the daemon at `base_url` with the session timeout and headers.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::new`].
    pub fn create_service_client(&self, base_url: &str) -> client::Result<ServiceClient> {
        let options = ClientOptions {
            timeout: self.config.service_timeout,
            default_headers: self.config.default_headers.clone(),
        };
        ServiceClient::new(base_url, &options)
    }

    /// Stop every daemon of the session.
    ///
    /// Never fails; daemons that could not be killed are logged and returned.
    pub async fn shutdown(self) -> Vec<ShutdownTimeoutWarning> {
        let warnings = self.registry.aclose().await;
        for warning in &warnings {
            warn!(%warning, "Daemon survived session shutdown");
        }
        info!(unkillable = warnings.len(), "Daemon session stopped");
        warnings
    }
}
