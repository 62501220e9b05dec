//! Start a daemon and keep it running until Ctrl+C.
//!
//! - `testd run -- ./api --port 8080` - ready once the process runs
//! - `testd run --ping-url http://127.0.0.1:8080/health -- ./api --port 8080`
//!
//! Daemon stdout/stderr are re-emitted as `testd::service` log events.

use std::time::Duration;

use anyhow::{Context, Result};

use super::HealthArgs;
use testd::config::SessionConfig;
use testd::daemon::{DaemonHandle, DaemonSession, SpawnSpec, tracing_output};
use testd::ui;

/// How often the foreground loop checks whether the daemon died.
const EXIT_WATCH_INTERVAL: Duration = Duration::from_millis(200);

/// Options of `testd run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub name: Option<String>,
    pub health: HealthArgs,
    pub env: Vec<(String, String)>,
    pub command: Vec<String>,
}

impl RunOptions {
    fn spawn_spec(&self) -> Result<SpawnSpec> {
        let mut builder = SpawnSpec::builder(&self.command)
            .envs(self.env.iter().cloned())
            .stdout_handler(tracing_output("stdout"))
            .stderr_handler(tracing_output("stderr"));
        if let Some(name) = &self.name {
            builder = builder.name(name.as_str());
        }
        Ok(self.health.apply(builder)?.build()?)
    }
}

/// Run a daemon in the foreground.
///
/// Returns an error if the daemon fails to start or exits on its own
/// before Ctrl+C.
pub async fn execute(config: SessionConfig, options: RunOptions) -> Result<()> {
    let spec = options.spawn_spec()?;
    let session = DaemonSession::new(config).context("Failed to start daemon session")?;
    let scope = session.create_daemon_scope(spec);

    let handle = match scope.request().await {
        Ok(handle) => handle,
        Err(e) => {
            ui::print_error_box("Daemon failed to start", Some(&e.to_string()));
            scope.close().await;
            session.shutdown().await;
            return Err(e).with_context(|| format!("Failed to start '{}'", options.command.join(" ")));
        },
    };

    match handle.pid() {
        Some(pid) => println!("{} is ready (pid {pid})", handle.scope()),
        None => println!("{} is ready", handle.scope()),
    }
    println!("Press Ctrl+C to stop");

    let exited = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            None
        },
        code = wait_for_exit(&handle) => Some(code),
    };

    scope.close().await;
    let unkillable = session.shutdown().await;

    if let Some(code) = exited {
        let code = code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
        anyhow::bail!("Daemon '{}' exited unexpectedly with {code}", handle.scope());
    }
    if !unkillable.is_empty() {
        anyhow::bail!("{} daemon(s) could not be stopped", unkillable.len());
    }
    println!("Stopped {}", handle.scope());
    Ok(())
}

/// Resolve once a daemon that owns a process has exited. Detached daemons
/// never resolve.
async fn wait_for_exit(handle: &DaemonHandle) -> Option<i32> {
    loop {
        if handle.pid().is_some() && !handle.is_alive() {
            return handle.exit_code();
        }
        tokio::time::sleep(EXIT_WATCH_INTERVAL).await;
    }
}
