//! Session configuration for testd.
//!
//! Settings are read from the `[service]` table of `testd.toml`:
//!
//! ```toml
//! [service]
//! timeout = 30            # service client timeout in seconds, 0 = none
//! disable = false         # never spawn, hand out ready dummy handles
//! wait = false            # wait for a service started by hand
//! shutdown_timeout = 10   # seconds before a stop escalates to SIGKILL
//! shutdown_signal = "SIGTERM"
//!
//! [service.headers]
//! x-test-run = "ci"
//! ```
//!
//! Missing keys fall back to [`SessionConfig::default`]. CLI flags are
//! applied on top through [`ConfigOverrides`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::constants;
use crate::daemon::ShutdownSignal;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Resolved settings shared by everything in one test session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Timeout of [`crate::client::ServiceClient`] requests. `None` disables it.
    pub service_timeout: Option<Duration>,
    /// Substitute an always-ready dummy for every daemon.
    pub service_disable: bool,
    /// Do not spawn; wait for a process started outside the test run.
    pub service_wait: bool,
    /// Grace period between the shutdown signal and SIGKILL.
    pub shutdown_timeout: Duration,
    /// Signal used to ask daemons to stop.
    pub shutdown_signal: ShutdownSignal,
    /// Headers sent with every service client request.
    pub default_headers: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_timeout: Some(constants::SERVICE_TIMEOUT),
            service_disable: false,
            service_wait: false,
            shutdown_timeout: constants::SHUTDOWN_TIMEOUT,
            shutdown_signal: ShutdownSignal::default(),
            default_headers: BTreeMap::new(),
        }
    }
}

/// On-disk layout of `testd.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    service: ServiceSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceSection {
    timeout: Option<f64>,
    disable: Option<bool>,
    wait: Option<bool>,
    shutdown_timeout: Option<f64>,
    shutdown_signal: Option<ShutdownSignal>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// Values given on the command line. `None` keeps the file value.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub service_timeout: Option<f64>,
    pub service_disable: bool,
    pub service_wait: bool,
    pub shutdown_timeout: Option<f64>,
    pub shutdown_signal: Option<ShutdownSignal>,
}

impl SessionConfig {
    /// Load configuration from `testd.toml` in the current directory.
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Path::new(constants::CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax or unknown keys
    /// - A duration is negative or a signal name is not recognised
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid TOML or out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        let service = file.service;
        let defaults = Self::default();

        let service_timeout = match service.timeout {
            Some(secs) => optional_seconds(secs).context("invalid service.timeout")?,
            None => defaults.service_timeout,
        };
        let shutdown_timeout = match service.shutdown_timeout {
            Some(secs) => seconds(secs).context("invalid service.shutdown_timeout")?,
            None => defaults.shutdown_timeout,
        };

        Ok(Self {
            service_timeout,
            service_disable: service.disable.unwrap_or(defaults.service_disable),
            service_wait: service.wait.unwrap_or(defaults.service_wait),
            shutdown_timeout,
            shutdown_signal: service.shutdown_signal.unwrap_or(defaults.shutdown_signal),
            default_headers: service.headers,
        })
    }

    /// Apply command-line overrides on top of the loaded values.
    ///
    /// # Errors
    ///
    /// Returns an error if an overriding duration is negative.
    pub fn apply(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(secs) = overrides.service_timeout {
            self.service_timeout = optional_seconds(secs).context("invalid --service-timeout")?;
        }
        if let Some(secs) = overrides.shutdown_timeout {
            self.shutdown_timeout =
                seconds(secs).context("invalid --service-shutdown-timeout")?;
        }
        if let Some(signal) = overrides.shutdown_signal {
            self.shutdown_signal = signal;
        }
        self.service_disable |= overrides.service_disable;
        self.service_wait |= overrides.service_wait;
        Ok(())
    }

    /// Validate the combination of settings.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails:
    /// - `disable` and `wait` are both set
    /// - A default header name is empty
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.service_disable && self.service_wait {
            errors.push(
                "service.disable and service.wait are mutually exclusive\n  \
                 disable hands out dummy daemons, wait expects a real one started by hand"
                    .to_string(),
            );
        }

        if self.default_headers.keys().any(String::is_empty) {
            errors.push("service.headers contains an empty header name".to_string());
        }

        if self.shutdown_timeout.is_zero() {
            warnings.push(
                "service.shutdown_timeout is 0\n  \
                 Daemons will be killed without a chance to stop gracefully"
                    .to_string(),
            );
        }

        if self.shutdown_signal == ShutdownSignal::Kill {
            warnings.push(
                "service.shutdown_signal is SIGKILL\n  \
                 Daemons cannot clean up; consider SIGTERM or SIGINT"
                    .to_string(),
            );
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("{secs} is not a valid number of seconds"))
}

/// Like [`seconds`], but zero means "no timeout".
fn optional_seconds(secs: f64) -> Result<Option<Duration>> {
    let duration = seconds(secs)?;
    Ok((!duration.is_zero()).then_some(duration))
}
