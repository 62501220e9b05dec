//! Wait for a daemon started by hand.
//!
//! `testd wait --ping-url http://127.0.0.1:8080/health -- ./api --port 8080`
//! prints the command to start and polls the ping URL until it answers.
//! Nothing is spawned or stopped.

use anyhow::{Context, Result};

use super::HealthArgs;
use testd::config::SessionConfig;
use testd::daemon::{DaemonSession, SpawnSpec};

/// Shown in the banner when no command was given.
const UNKNOWN_COMMAND: &str = "<your service>";

/// Poll until the externally started daemon is ready.
pub async fn execute(mut config: SessionConfig, health: HealthArgs, command: Vec<String>) -> Result<()> {
    let ping_url = health
        .ping_url
        .clone()
        .context("testd wait needs --ping-url to know when the service is ready")?;

    config.service_disable = false;
    config.service_wait = true;

    let command = if command.is_empty() {
        vec![UNKNOWN_COMMAND.to_string()]
    } else {
        command
    };
    let spec = health.apply(SpawnSpec::builder(command).name(ping_url.as_str()))?.build()?;

    let session = DaemonSession::new(config).context("Failed to start daemon session")?;
    let scope = session.create_daemon_scope(spec);
    let result = session.request_gate().request(&scope).await;

    scope.close().await;
    session.shutdown().await;

    result.with_context(|| format!("Service at {ping_url} did not become ready"))?;
    println!("{ping_url} is ready");
    Ok(())
}
