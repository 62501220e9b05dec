//! Readiness polling for spawned daemons.
//!
//! A [`HealthChecker`] evaluates a [`HealthCheck`] up to `poll_retries`
//! times, sleeping `poll_interval` between attempts. Each attempt is bounded
//! by the ping request timeout. Failed or timed-out attempts are retried;
//! a process that exits while being waited on ends the wait immediately.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tracing::{debug, info};

use super::error::{DaemonError, Result};
use super::handle::DaemonHandle;
use super::process::ProcessState;
use super::spec::{HealthCheck, PingMethod, SpawnSpec};
use crate::constants;

/// What a health predicate gets to work with.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    pid: Option<u32>,
}

impl HealthProbe {
    /// Shared HTTP client of the session.
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Pid of the daemon, `None` when no process is owned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Outcome of a readiness evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub ready: bool,
    pub message: Option<String>,
}

impl HealthCheckResult {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            ready: true,
            message: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            ready: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    NotReady(String),
    Exited { pid: u32, exit_code: Option<i32> },
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotReady(reason) => f.write_str(reason),
            Self::Exited { pid, .. } => write!(f, "process {pid} exited"),
        }
    }
}

/// Polls a daemon until it is ready or the retry budget is spent.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    check: HealthCheck,
    client: reqwest::Client,
    poll_retries: u32,
    poll_interval: Duration,
    attempt_timeout: Duration,
}

impl HealthChecker {
    /// Checker with the default retry budget and timeouts.
    #[must_use]
    pub fn new(check: HealthCheck, client: reqwest::Client) -> Self {
        Self {
            check,
            client,
            poll_retries: constants::POLL_RETRIES,
            poll_interval: constants::POLL_INTERVAL,
            attempt_timeout: constants::PING_REQUEST_TIMEOUT,
        }
    }

    /// Checker configured from a spawn specification.
    #[must_use]
    pub fn from_spec(spec: &SpawnSpec, client: reqwest::Client) -> Self {
        Self::new(spec.health_check().clone(), client)
            .with_poll(spec.poll_retries(), spec.poll_interval())
            .with_attempt_timeout(spec.ping_request_timeout())
    }

    #[must_use]
    pub fn with_poll(mut self, retries: u32, interval: Duration) -> Self {
        self.poll_retries = retries;
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn poll_retries(&self) -> u32 {
        self.poll_retries
    }

    /// Run one readiness attempt, bounded by the attempt timeout.
    pub async fn check_once(&self, pid: Option<u32>) -> HealthCheckResult {
        match tokio::time::timeout(self.attempt_timeout, self.evaluate(pid)).await {
            Ok(result) => result,
            Err(_) => HealthCheckResult::unhealthy(format!(
                "attempt timed out after {}ms",
                self.attempt_timeout.as_millis()
            )),
        }
    }

    /// Poll until `handle` is ready.
    ///
    /// On success the handle moves to [`ProcessState::Healthy`]; on failure
    /// to [`ProcessState::Failed`]. Handles that own a process are checked
    /// for liveness before every attempt and after every failed one.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::ProcessExited`] as soon as the process is seen dead.
    /// - [`DaemonError::HealthCheckTimeout`] after `poll_retries` failed
    ///   attempts (immediately when the budget is zero).
    pub async fn wait_ready(&self, handle: &DaemonHandle) -> Result<HealthCheckResult> {
        if self.poll_retries == 0 {
            handle.set_state(ProcessState::Failed);
            return Err(DaemonError::HealthCheckTimeout {
                scope: handle.scope().to_string(),
                attempts: 0,
                last_failure: None,
            });
        }

        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let backoff = ConstantBuilder::default()
            .with_delay(self.poll_interval)
            .with_max_times((self.poll_retries - 1) as usize);

        let result = (move || async move {
            let attempt = counter.fetch_add(1, Ordering::Relaxed) + 1;
            self.attempt(handle, attempt).await
        })
        .retry(backoff)
        .when(AttemptError::is_retryable)
        .notify(|err: &AttemptError, delay: Duration| {
            debug!(
                scope = %handle.scope(),
                attempt = attempts.load(Ordering::Relaxed),
                max_attempts = self.poll_retries,
                next_delay_ms = delay.as_millis() as u64,
                reason = %err,
                "Daemon not ready yet"
            );
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(outcome) => {
                handle.set_state(ProcessState::Healthy);
                info!(scope = %handle.scope(), pid = ?handle.pid(), attempts, "Daemon is ready");
                Ok(outcome)
            },
            Err(AttemptError::NotReady(reason)) => {
                handle.set_state(ProcessState::Failed);
                Err(DaemonError::HealthCheckTimeout {
                    scope: handle.scope().to_string(),
                    attempts,
                    last_failure: Some(reason),
                })
            },
            Err(AttemptError::Exited { pid, exit_code }) => {
                handle.set_state(ProcessState::Failed);
                Err(DaemonError::ProcessExited {
                    scope: handle.scope().to_string(),
                    pid,
                    exit_code,
                })
            },
        }
    }

    async fn attempt(
        &self,
        handle: &DaemonHandle,
        attempt: u32,
    ) -> std::result::Result<HealthCheckResult, AttemptError> {
        exited(handle)?;

        let result = self.check_once(handle.pid()).await;
        if result.ready {
            return Ok(result);
        }
        // The attempt may have failed because the process died meanwhile.
        exited(handle)?;
        let reason = result
            .message
            .unwrap_or_else(|| format!("attempt {attempt} failed"));
        Err(AttemptError::NotReady(reason))
    }

    async fn evaluate(&self, pid: Option<u32>) -> HealthCheckResult {
        match &self.check {
            HealthCheck::Ping {
                url,
                method,
                response_codes,
            } => {
                let request = match method {
                    PingMethod::Get => self.client.get(url.clone()),
                    PingMethod::Head => self.client.head(url.clone()),
                };
                match request.timeout(self.attempt_timeout).send().await {
                    Ok(response) => {
                        let status = response.status();
                        if HealthCheck::accepts_status(response_codes, status.as_u16()) {
                            HealthCheckResult::healthy()
                        } else {
                            HealthCheckResult::unhealthy(format!("ping returned {status}"))
                        }
                    },
                    Err(e) => HealthCheckResult::unhealthy(format!("ping failed: {e}")),
                }
            },
            HealthCheck::Predicate(predicate) => {
                let probe = HealthProbe {
                    client: self.client.clone(),
                    pid,
                };
                match predicate(probe).await {
                    Ok(true) => HealthCheckResult::healthy(),
                    Ok(false) => HealthCheckResult::unhealthy("health check returned false"),
                    Err(e) => HealthCheckResult::unhealthy(format!("health check failed: {e:#}")),
                }
            },
        }
    }
}

/// Fails when `handle` owns a process that is no longer running.
fn exited(handle: &DaemonHandle) -> std::result::Result<(), AttemptError> {
    match handle.pid() {
        Some(pid) if !handle.is_alive() => Err(AttemptError::Exited {
            pid,
            exit_code: handle.exit_code(),
        }),
        _ => Ok(()),
    }
}
