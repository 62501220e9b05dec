//! testd: service daemons for integration and component tests.
//!
//! A [`DaemonSession`] spawns the external service a test depends on, waits
//! until it answers its health check, hands the same instance to every test
//! that asks for the same scope and stops it again (escalating to SIGKILL
//! when needed) when the scope changes or the session ends.
//!
//! ```ignore
//! use testd::{DaemonSession, SpawnSpec, config::SessionConfig};
//!
//! let session = DaemonSession::new(SessionConfig::load()?)?;
//! let api = session.create_daemon_scope(
//!     SpawnSpec::builder(["./api", "--port", "8080"])
//!         .ping_url("http://127.0.0.1:8080/health")
//!         .build()?,
//! );
//!
//! let mut gate = session.request_gate();
//! let handle = gate.request(&api).await?;
//! // ... exercise the service ...
//! api.close().await;
//! session.shutdown().await;
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod daemon;
pub mod ui;

pub use daemon::{
    DaemonError, DaemonHandle, DaemonScope, DaemonSession, HealthCheck, ProcessState, RequestGate,
    Result, ScopeRegistry, ShutdownSignal, SpawnOutcome, SpawnSpec, Spawner,
};
