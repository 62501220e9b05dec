//! Default values shared by the spawner, health checker and shutdown logic.

use std::time::Duration;

/// Default number of readiness attempts before a spawn is declared failed.
pub const POLL_RETRIES: u32 = 2000;

/// Default pause between two readiness attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default timeout for a single ping request.
pub const PING_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Default service client timeout.
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time a daemon gets to exit after the graceful shutdown signal.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace period after SIGKILL before a process is reported as unkillable.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Liveness polling interval while waiting for a process to exit.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration file looked up by [`crate::config::SessionConfig::load`].
pub const CONFIG_FILE: &str = "testd.toml";

/// Tracing target used for forwarded daemon stdout/stderr lines.
pub const SERVICE_LOG_TARGET: &str = "testd::service";
