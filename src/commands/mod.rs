//! CLI command implementations for testd.
//!
//! - [`run`] - Start a daemon and keep it running until Ctrl+C
//! - [`wait`] - Wait for a daemon started by hand

pub mod run;
pub mod wait;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use testd::daemon::{PingMethod, SpawnSpecBuilder};

/// Readiness options shared by `run` and `wait`.
#[derive(Args, Debug, Clone, Default)]
pub struct HealthArgs {
    /// Absolute URL polled until it answers with a 2xx status
    #[arg(long, value_name = "URL")]
    pub ping_url: Option<String>,

    /// Ping with HEAD instead of GET
    #[arg(long)]
    pub head: bool,

    /// Maximum number of readiness attempts
    #[arg(long, value_name = "N")]
    pub poll_retries: Option<u32>,

    /// Timeout of a single ping in seconds
    #[arg(long, value_name = "SECS")]
    pub ping_timeout: Option<f64>,
}

impl HealthArgs {
    /// Apply these options to a spawn specification.
    ///
    /// Without a ping URL the daemon counts as ready once its process runs.
    pub fn apply(&self, mut builder: SpawnSpecBuilder) -> Result<SpawnSpecBuilder> {
        builder = match &self.ping_url {
            Some(url) => builder.ping_url(url.as_str()).ping_method(if self.head {
                PingMethod::Head
            } else {
                PingMethod::Get
            }),
            None => builder.health_check_fn(|_probe| async { anyhow::Ok(true) }),
        };
        if let Some(retries) = self.poll_retries {
            builder = builder.poll_retries(retries);
        }
        if let Some(secs) = self.ping_timeout {
            let timeout = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid --ping-timeout: {secs}"))?;
            builder = builder.ping_request_timeout(timeout);
        }
        Ok(builder)
    }
}

/// Parse a `KEY=VALUE` environment assignment.
pub fn parse_env(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Initialize logging to stderr, keeping stdout for command output.
pub fn init_logging(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testd::daemon::{HealthCheck, SpawnSpec};

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("RUST_LOG=debug").unwrap(),
            ("RUST_LOG".to_string(), "debug".to_string())
        );
        assert_eq!(
            parse_env("URL=http://x/?a=b").unwrap(),
            ("URL".to_string(), "http://x/?a=b".to_string())
        );
        assert_eq!(parse_env("EMPTY=").unwrap().1, "");
        assert!(parse_env("NOVALUE").is_err());
        assert!(parse_env("=value").is_err());
    }

    #[test]
    fn test_health_args_with_ping_url() {
        let args = HealthArgs {
            ping_url: Some("http://127.0.0.1:8080/health".to_string()),
            head: true,
            poll_retries: Some(5),
            ping_timeout: Some(0.25),
        };
        let spec = args.apply(SpawnSpec::builder(["./api"])).unwrap().build().unwrap();

        assert!(matches!(
            spec.health_check(),
            HealthCheck::Ping {
                method: PingMethod::Head,
                ..
            }
        ));
        assert_eq!(spec.poll_retries(), 5);
        assert_eq!(spec.ping_request_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_health_args_without_ping_url_uses_predicate() {
        let spec = HealthArgs::default()
            .apply(SpawnSpec::builder(["./api"]))
            .unwrap()
            .build()
            .unwrap();
        assert!(matches!(spec.health_check(), HealthCheck::Predicate(_)));
    }

    #[test]
    fn test_health_args_rejects_negative_timeout() {
        let args = HealthArgs {
            ping_timeout: Some(-1.0),
            ..HealthArgs::default()
        };
        assert!(args.apply(SpawnSpec::builder(["./api"])).is_err());
    }
}
