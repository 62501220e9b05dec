//! Service daemon lifecycle management.
//!
//! Spawns external service processes for tests, waits until they are ready,
//! reuses them across requests and stops them again.
//!
//! ## Module Structure
//!
//! - [`spec`]: What to spawn and how to health-check it
//! - [`process`]: Process launching, stdio forwarding and shutdown
//! - [`health`]: Readiness polling
//! - [`handle`]: Runtime handles and spawn outcomes
//! - [`spawner`]: Spawn modes and the spawner factory
//! - [`registry`]: Scope cache with close-all-before-spawn semantics
//! - [`gate`]: One-scope-per-test enforcement
//! - [`session`]: The per-session context tying it together

mod error;
pub mod gate;
pub mod handle;
pub mod health;
pub mod process;
pub mod registry;
pub mod session;
mod signal;
pub mod spawner;
pub mod spec;

pub use error::{DaemonError, Result, ShutdownTimeoutWarning};
pub use gate::{CaptureControl, NoCapture, RequestGate};
pub use handle::{DaemonHandle, PendingDaemon, ShutdownPolicy, SpawnOutcome};
pub use health::{HealthCheckResult, HealthChecker, HealthProbe};
pub use process::{DaemonProcess, ProcessState, start_process, terminate, tracing_output};
pub use registry::{DaemonScope, ScopeGuard, ScopeRegistry};
pub use session::DaemonSession;
pub use signal::{ShutdownSignal, UnknownSignal};
pub use spawner::{LegacySpawner, ServiceSpawner, ServiceSpawnerFactory, SpawnMode, Spawner, legacy_spawner};
pub use spec::{HealthCheck, PingMethod, SpawnSpec, SpawnSpecBuilder};
