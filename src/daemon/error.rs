//! Error types for daemon lifecycle operations.
//!
//! Launch and readiness failures propagate to the caller that requested the
//! daemon. Shutdown problems never do: they surface as
//! [`ShutdownTimeoutWarning`] values that are logged and returned, so one
//! stuck process cannot block the rest of a teardown.

use std::time::Duration;

use super::signal::ShutdownSignal;

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors raised while spawning, health-checking or requesting daemons.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DaemonError {
    /// The spawn specification is not usable.
    #[error("invalid spawn specification: {reason}")]
    InvalidSpec { reason: String },

    /// The OS failed to start the process.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Readiness retries were exhausted.
    #[error(
        "daemon '{scope}' did not become ready after {attempts} attempts{}",
        describe_last_failure(.last_failure)
    )]
    HealthCheckTimeout {
        scope: String,
        attempts: u32,
        last_failure: Option<String>,
    },

    /// The process exited while its readiness was being awaited.
    #[error("daemon '{scope}' (pid {pid}) exited during startup with {}", describe_exit(.exit_code))]
    ProcessExited {
        scope: String,
        pid: u32,
        exit_code: Option<i32>,
    },

    /// One test requested more than one daemon scope.
    #[error("test requested multiple daemons: {scopes:?}")]
    MultipleScopeRequest { scopes: Vec<String> },

    /// The HTTP client used for health checks could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl DaemonError {
    /// Create an invalid specification error.
    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }

    /// Create a launch error.
    pub fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

fn describe_last_failure(failure: &Option<String>) -> String {
    failure
        .as_deref()
        .map(|message| format!(" (last failure: {message})"))
        .unwrap_or_default()
}

/// A daemon that did not exit even after being force-killed.
///
/// Non-fatal: the handle is still marked terminated and teardown continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "daemon '{scope}' (pid {pid}) ignored {signal} for {timeout:?} and survived SIGKILL; giving up"
)]
pub struct ShutdownTimeoutWarning {
    pub scope: String,
    pub pid: u32,
    pub signal: ShutdownSignal,
    pub timeout: Duration,
}
