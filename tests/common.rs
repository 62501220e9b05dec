//! Shared helpers for testd integration tests.
//!
//! - [`PingServer`]: in-process axum server whose `/health` can be toggled
//! - [`sh_spec`]: spawn specifications for `/bin/sh` scripts
//! - [`session`]: a launch-mode session with short shutdown timeouts

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum::routing::{get, post};
use tokio::task::JoinHandle;

use testd::config::SessionConfig;
use testd::daemon::{DaemonSession, ShutdownSignal, SpawnSpec, SpawnSpecBuilder};

#[derive(Clone, Default)]
struct PingState {
    ready: Arc<AtomicBool>,
    hits: Arc<AtomicU32>,
}

/// HTTP server standing in for a daemon's health endpoint.
pub struct PingServer {
    addr: SocketAddr,
    state: PingState,
    task: JoinHandle<()>,
}

impl PingServer {
    /// Server that answers `/health` with 200 right away.
    pub async fn start() -> Self {
        let server = Self::start_not_ready().await;
        server.set_ready(true);
        server
    }

    /// Server that answers `/health` with 503 until [`PingServer::set_ready`].
    pub async fn start_not_ready() -> Self {
        let state = PingState::default();
        let app = Router::new()
            .route("/health", get(health))
            .route("/echo/{header}", get(echo_header))
            .route("/echo-json", post(echo_json))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind ping server");
        let addr = listener.local_addr().expect("No local address");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Ping server failed");
        });

        Self { addr, state, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of `/health` requests served so far.
    pub fn hits(&self) -> u32 {
        self.state.hits.load(Ordering::SeqCst)
    }
}

impl Drop for PingServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn health(State(state): State<PingState>) -> StatusCode {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if state.ready.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn echo_header(
    axum::extract::Path(header): axum::extract::Path<String>,
    headers: HeaderMap,
) -> String {
    headers
        .get(&header)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn echo_json(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(body)
}

/// Builder for a `/bin/sh -c script` daemon named `name`.
///
/// No health check is set; callers add a ping URL or predicate.
pub fn sh_builder(name: &str, script: &str) -> SpawnSpecBuilder {
    SpawnSpec::builder(["/bin/sh", "-c", script])
        .name(name)
        .poll_interval(Duration::from_millis(20))
}

/// `/bin/sh -c script` daemon that is ready as soon as it runs.
pub fn sh_spec(name: &str, script: &str) -> SpawnSpec {
    sh_builder(name, script)
        .health_check_fn(|_probe| async { anyhow::Ok(true) })
        .build()
        .expect("Invalid spawn spec")
}

/// Launch-mode session that stops daemons with SIGTERM and escalates fast.
pub fn session() -> DaemonSession {
    DaemonSession::new(SessionConfig {
        shutdown_signal: ShutdownSignal::Terminate,
        shutdown_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    })
    .expect("Failed to create session")
}

/// True while a process with `pid` exists (zombies included).
#[cfg(unix)]
pub fn pid_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Poll `condition` every 10ms for up to `timeout`.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
