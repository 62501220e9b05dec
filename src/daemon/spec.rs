//! Immutable description of how to spawn and health-check a daemon.
//!
//! A [`SpawnSpec`] is built once per call site with [`SpawnSpec::builder`]
//! and never changes afterwards. Building validates that a readiness check
//! can actually be constructed from it.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use url::Url;

use super::error::{DaemonError, Result};
use super::health::HealthProbe;
use super::signal::ShutdownSignal;
use crate::constants;

/// Receives one line of daemon output, without the trailing newline.
pub type OutputHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Called with the daemon pid right after the process is started.
pub type SetupHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Caller-supplied readiness predicate.
pub type HealthPredicate =
    Arc<dyn Fn(HealthProbe) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// HTTP method used for ping health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingMethod {
    #[default]
    Get,
    Head,
}

/// How readiness of a daemon is decided.
#[derive(Clone)]
pub enum HealthCheck {
    /// HTTP request to `url`; ready when the status is accepted.
    Ping {
        url: Url,
        method: PingMethod,
        /// Accepted status codes. Empty means any 2xx.
        response_codes: Vec<u16>,
    },
    /// Custom asynchronous predicate.
    Predicate(HealthPredicate),
}

fn boxed_predicate<F, Fut>(check: F) -> HealthPredicate
where
    F: Fn(HealthProbe) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(
        move |probe: HealthProbe| -> BoxFuture<'static, anyhow::Result<bool>> {
            Box::pin(check(probe))
        },
    )
}

impl HealthCheck {
    /// Wrap an async closure as a predicate health check.
    pub fn predicate<F, Fut>(check: F) -> Self
    where
        F: Fn(HealthProbe) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self::Predicate(boxed_predicate(check))
    }

    /// Returns true if `status` counts as a successful ping.
    #[must_use]
    pub fn accepts_status(response_codes: &[u16], status: u16) -> bool {
        if response_codes.is_empty() {
            (200..300).contains(&status)
        } else {
            response_codes.contains(&status)
        }
    }

    /// Short human-readable description of the readiness target.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Ping { url, method, .. } => {
                let method = match method {
                    PingMethod::Get => "GET",
                    PingMethod::Head => "HEAD",
                };
                format!("{method} {url}")
            },
            Self::Predicate(_) => "custom health check".to_string(),
        }
    }
}

impl fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping {
                url,
                method,
                response_codes,
            } => f
                .debug_struct("Ping")
                .field("url", &url.as_str())
                .field("method", method)
                .field("response_codes", response_codes)
                .finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Everything needed to start one daemon and decide when it is usable.
#[derive(Clone)]
pub struct SpawnSpec {
    name: Option<String>,
    args: Vec<String>,
    command: Vec<String>,
    env: BTreeMap<String, String>,
    health_check: HealthCheck,
    poll_retries: u32,
    poll_interval: Duration,
    ping_request_timeout: Duration,
    shutdown_signal: Option<ShutdownSignal>,
    shutdown_timeout: Option<Duration>,
    setup_service: Option<SetupHook>,
    stdout_handler: Option<OutputHandler>,
    stderr_handler: Option<OutputHandler>,
}

impl SpawnSpec {
    /// Start building a specification for `args`.
    pub fn builder<I, S>(args: I) -> SpawnSpecBuilder
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        SpawnSpecBuilder::new(args)
    }

    /// Scope key for this daemon: the explicit name, or the joined arguments.
    #[must_use]
    pub fn scope_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.args.join(" "))
    }

    /// Full command line, base command first.
    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        // `build` rejects empty command lines.
        self.command.first().map_or("", String::as_str)
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn health_check(&self) -> &HealthCheck {
        &self.health_check
    }

    #[must_use]
    pub fn poll_retries(&self) -> u32 {
        self.poll_retries
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn ping_request_timeout(&self) -> Duration {
        self.ping_request_timeout
    }

    /// Accepted ping status codes; empty for predicate checks or "any 2xx".
    #[must_use]
    pub fn ping_response_codes(&self) -> &[u16] {
        match &self.health_check {
            HealthCheck::Ping { response_codes, .. } => response_codes,
            HealthCheck::Predicate(_) => &[],
        }
    }

    /// Shutdown signal override; `None` defers to the session configuration.
    #[must_use]
    pub fn shutdown_signal(&self) -> Option<ShutdownSignal> {
        self.shutdown_signal
    }

    /// Shutdown timeout override; `None` defers to the session configuration.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout
    }

    #[must_use]
    pub fn setup_service(&self) -> Option<&SetupHook> {
        self.setup_service.as_ref()
    }

    #[must_use]
    pub fn stdout_handler(&self) -> Option<&OutputHandler> {
        self.stdout_handler.as_ref()
    }

    #[must_use]
    pub fn stderr_handler(&self) -> Option<&OutputHandler> {
        self.stderr_handler.as_ref()
    }
}

impl fmt::Debug for SpawnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnSpec")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("env", &self.env)
            .field("health_check", &self.health_check)
            .field("poll_retries", &self.poll_retries)
            .field("poll_interval", &self.poll_interval)
            .field("ping_request_timeout", &self.ping_request_timeout)
            .field("shutdown_signal", &self.shutdown_signal)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("setup_service", &self.setup_service.is_some())
            .field("stdout_handler", &self.stdout_handler.is_some())
            .field("stderr_handler", &self.stderr_handler.is_some())
            .finish()
    }
}

/// Builder for [`SpawnSpec`].
#[must_use]
pub struct SpawnSpecBuilder {
    name: Option<String>,
    args: Vec<String>,
    base_command: Vec<String>,
    env: BTreeMap<String, String>,
    ping_url: Option<String>,
    ping_method: PingMethod,
    ping_response_codes: Vec<u16>,
    health_check: Option<HealthPredicate>,
    poll_retries: u32,
    poll_interval: Duration,
    ping_request_timeout: Duration,
    shutdown_signal: Option<ShutdownSignal>,
    shutdown_timeout: Option<Duration>,
    setup_service: Option<SetupHook>,
    stdout_handler: Option<OutputHandler>,
    stderr_handler: Option<OutputHandler>,
}

impl SpawnSpecBuilder {
    fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            name: None,
            args: args.into_iter().map(|arg| arg.to_string()).collect(),
            base_command: Vec::new(),
            env: BTreeMap::new(),
            ping_url: None,
            ping_method: PingMethod::default(),
            ping_response_codes: Vec::new(),
            health_check: None,
            poll_retries: constants::POLL_RETRIES,
            poll_interval: constants::POLL_INTERVAL,
            ping_request_timeout: constants::PING_REQUEST_TIMEOUT,
            shutdown_signal: None,
            shutdown_timeout: None,
            setup_service: None,
            stdout_handler: None,
            stderr_handler: None,
        }
    }

    /// Explicit scope key. Defaults to the space-joined arguments.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Arguments prepended to `args` when launching.
    pub fn base_command<I, S>(mut self, base_command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.base_command = base_command.into_iter().map(|arg| arg.to_string()).collect();
        self
    }

    /// Add an environment variable on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Absolute URL pinged to decide readiness.
    pub fn ping_url(mut self, url: impl Into<String>) -> Self {
        self.ping_url = Some(url.into());
        self
    }

    pub fn ping_method(mut self, method: PingMethod) -> Self {
        self.ping_method = method;
        self
    }

    /// Status codes meaning "up". Empty (the default) accepts any 2xx.
    pub fn ping_response_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.ping_response_codes = codes.into();
        self
    }

    pub fn ping_request_timeout(mut self, timeout: Duration) -> Self {
        self.ping_request_timeout = timeout;
        self
    }

    /// Custom readiness predicate. Takes precedence over `ping_url`.
    pub fn health_check(mut self, check: HealthPredicate) -> Self {
        self.health_check = Some(check);
        self
    }

    /// Convenience for [`Self::health_check`] with an async closure.
    pub fn health_check_fn<F, Fut>(self, check: F) -> Self
    where
        F: Fn(HealthProbe) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.health_check(boxed_predicate(check))
    }

    pub fn poll_retries(mut self, retries: u32) -> Self {
        self.poll_retries = retries;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn shutdown_signal(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown_signal = Some(signal);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn setup_service<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.setup_service = Some(Arc::new(hook));
        self
    }

    pub fn stdout_handler(mut self, handler: OutputHandler) -> Self {
        self.stdout_handler = Some(handler);
        self
    }

    pub fn stderr_handler(mut self, handler: OutputHandler) -> Self {
        self.stderr_handler = Some(handler);
        self
    }

    /// Validate and freeze the specification.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::InvalidSpec`] if the command line is empty,
    /// neither a ping URL nor a predicate is configured, or the ping URL is
    /// not an absolute HTTP(S) URL.
    pub fn build(self) -> Result<SpawnSpec> {
        let command = build_command_args(&self.args, &self.base_command);
        if command.is_empty() {
            return Err(DaemonError::invalid_spec("command arguments are empty"));
        }

        let health_check = match (self.health_check, self.ping_url) {
            (Some(predicate), _) => HealthCheck::Predicate(predicate),
            (None, Some(raw)) => HealthCheck::Ping {
                url: parse_ping_url(&raw)?,
                method: self.ping_method,
                response_codes: self.ping_response_codes,
            },
            (None, None) => {
                return Err(DaemonError::invalid_spec(
                    "either a ping URL or a health check predicate must be set",
                ));
            },
        };

        Ok(SpawnSpec {
            name: self.name,
            args: self.args,
            command,
            env: self.env,
            health_check,
            poll_retries: self.poll_retries,
            poll_interval: self.poll_interval,
            ping_request_timeout: self.ping_request_timeout,
            shutdown_signal: self.shutdown_signal,
            shutdown_timeout: self.shutdown_timeout,
            setup_service: self.setup_service,
            stdout_handler: self.stdout_handler,
            stderr_handler: self.stderr_handler,
        })
    }
}

fn parse_ping_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| DaemonError::invalid_spec(format!("invalid ping URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DaemonError::invalid_spec(format!(
            "ping URL '{raw}' must use http or https"
        )));
    }
    Ok(url)
}

/// Base command followed by the arguments.
pub fn build_command_args(args: &[String], base_command: &[String]) -> Vec<String> {
    base_command.iter().chain(args).cloned().collect()
}
