//! Daemon lifecycle integration tests.
//!
//! These spawn real `/bin/sh` processes and go through the full session:
//! - Reuse of a cached daemon
//! - Close-all-before-spawn when the scope changes
//! - Bounded readiness waits and crash detection
//! - Cancellation during a readiness wait
//! - Shutdown escalation at session teardown
//!
//! Tests run serially because daemon lifecycles are deliberately serialised.

#![cfg(unix)]

#[path = "common.rs"]
mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serial_test::serial;

use common::{PingServer, eventually, pid_exists, session, sh_builder, sh_spec};
use testd::daemon::{DaemonError, ProcessState, ShutdownSignal, SpawnSpec};

// =============================================================================
// Reuse
// =============================================================================

#[tokio::test]
#[serial]
async fn test_same_scope_reuses_running_daemon() {
    let session = session();
    let spawns = Arc::new(AtomicU32::new(0));
    let counter = spawns.clone();
    let spec = sh_builder("api", "exec sleep 30")
        .health_check_fn(|_probe| async { anyhow::Ok(true) })
        .setup_service(move |_pid| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);

    let first = scope.request().await.unwrap();
    let second = scope.request().await.unwrap();

    assert!(first.same_instance(&second));
    assert_eq!(first.pid(), second.pid());
    assert_eq!(spawns.load(Ordering::SeqCst), 1);
    assert_eq!(first.state(), ProcessState::Healthy);
    assert!(session.registry().has_running_daemons().await);

    scope.close().await;
    assert!(!first.is_alive());
    assert!(session.shutdown().await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_reuse_skips_health_check() {
    let session = session();
    let checks = Arc::new(AtomicU32::new(0));
    let counter = checks.clone();
    let spec = sh_builder("api", "exec sleep 30")
        .health_check_fn(move |_probe| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(true)
            }
        })
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);

    scope.request().await.unwrap();
    scope.request().await.unwrap();
    scope.request().await.unwrap();
    assert_eq!(checks.load(Ordering::SeqCst), 1);

    scope.close().await;
    session.shutdown().await;
}

// =============================================================================
// Exclusive group
// =============================================================================

#[tokio::test]
#[serial]
async fn test_new_scope_terminates_previous_before_starting() {
    let session = session();
    let a_scope = session.create_daemon_scope(sh_spec("a", "exec sleep 30"));
    let a = a_scope.request().await.unwrap();
    let a_pid = a.pid().unwrap();

    // Observe a's state at the moment b's process has just been started.
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let watched = a.clone();
    let b_spec = sh_builder("b", "exec sleep 30")
        .health_check_fn(|_probe| async { anyhow::Ok(true) })
        .setup_service(move |_pid| {
            *sink.lock() = Some((watched.state(), watched.is_alive()));
        })
        .build()
        .unwrap();
    let b_scope = session.create_daemon_scope(b_spec);
    let b = b_scope.request().await.unwrap();

    assert_eq!(*seen.lock(), Some((ProcessState::Terminated, false)));
    assert!(!pid_exists(a_pid));
    assert_eq!(b.state(), ProcessState::Healthy);
    assert!(session.registry().cached("a").await.is_none());
    assert_eq!(session.registry().len().await, 1);

    a_scope.close().await;
    b_scope.close().await;
    session.shutdown().await;
}

// =============================================================================
// Bounded wait
// =============================================================================

#[tokio::test]
#[serial]
async fn test_failing_health_check_is_bounded_and_cleans_up() {
    let session = session();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let pid = Arc::new(AtomicU32::new(0));
    let pid_sink = pid.clone();
    let spec = sh_builder("never-ready", "exec sleep 30")
        .poll_retries(3)
        .health_check_fn(move |_probe| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(false)
            }
        })
        .setup_service(move |p| pid_sink.store(p, Ordering::SeqCst))
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);

    let err = scope.request().await.unwrap_err();

    assert!(matches!(err, DaemonError::HealthCheckTimeout { attempts: 3, .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(!pid_exists(pid.load(Ordering::SeqCst)));
    assert!(session.registry().is_empty().await);
    assert!(!session.registry().has_running_daemons().await);

    scope.close().await;
    session.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_ping_timeout_counts_as_failed_attempt() {
    let session = session();
    let spec = sh_builder("slow", "exec sleep 30")
        .poll_retries(2)
        .ping_request_timeout(Duration::from_millis(50))
        .health_check_fn(|_probe| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            anyhow::Ok(true)
        })
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);

    let started = Instant::now();
    let err = scope.request().await.unwrap_err();
    assert!(matches!(err, DaemonError::HealthCheckTimeout { attempts: 2, .. }));
    assert!(started.elapsed() < Duration::from_secs(3));

    scope.close().await;
    session.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_process_exit_during_wait_fails_fast() {
    let session = session();
    let spec = sh_builder("crashing", "sleep 0.1; exit 7")
        .health_check_fn(|_probe| async { anyhow::Ok(false) })
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);

    let started = Instant::now();
    let err = scope.request().await.unwrap_err();

    match err {
        DaemonError::ProcessExited { exit_code, .. } => assert_eq!(exit_code, Some(7)),
        other => panic!("unexpected error: {other}"),
    }
    // The default budget is 2000 attempts; failing fast means well below it.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(session.registry().is_empty().await);

    scope.close().await;
    session.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_launch_error_leaves_registry_empty() {
    let session = session();
    let scope = session.create_daemon_scope(
        testd::SpawnSpec::builder(["/definitely/not/a/binary"])
            .health_check_fn(|_probe| async { anyhow::Ok(true) })
            .build()
            .unwrap(),
    );

    let err = scope.request().await.unwrap_err();
    assert!(matches!(err, DaemonError::Launch { .. }));
    assert!(session.registry().is_empty().await);

    scope.close().await;
    session.shutdown().await;
}

// =============================================================================
// Crash detection
// =============================================================================

#[tokio::test]
#[serial]
async fn test_crashed_daemon_is_replaced() {
    let session = session();
    let scope = session.create_daemon_scope(sh_spec("api", "exec sleep 30"));

    let first = scope.request().await.unwrap();
    let first_pid = first.pid().unwrap();
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(first_pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    )
    .unwrap();
    assert!(eventually(Duration::from_secs(5), || !first.is_alive()).await);

    let second = scope.request().await.unwrap();
    assert!(!first.same_instance(&second));
    assert_ne!(second.pid(), Some(first_pid));
    assert_eq!(first.state(), ProcessState::Terminated);
    assert!(second.is_alive());

    scope.close().await;
    session.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_clean_exit_also_evicts() {
    let session = session();
    let scope = session.create_daemon_scope(sh_spec("oneshot", "sleep 0.2; exit 0"));

    let first = scope.request().await.unwrap();
    assert!(eventually(Duration::from_secs(5), || !first.is_alive()).await);
    assert_eq!(first.exit_code(), Some(0));

    let second = scope.request().await.unwrap();
    assert!(!first.same_instance(&second));

    scope.close().await;
    session.shutdown().await;
}

// =============================================================================
// Cancellation
// =============================================================================

/// Daemon whose readiness follows `ready`.
fn gated_spec(name: &str, ready: Arc<AtomicBool>) -> SpawnSpec {
    sh_builder(name, "exec sleep 30")
        .health_check_fn(move |_probe| {
            let ready = ready.clone();
            async move { anyhow::Ok(ready.load(Ordering::SeqCst)) }
        })
        .build()
        .unwrap()
}

#[tokio::test]
#[serial]
async fn test_cancelled_request_leaves_daemon_for_aclose() {
    let session = session();
    let scope = session.create_daemon_scope(gated_spec("api", Arc::new(AtomicBool::new(false))));

    let cancelled = tokio::time::timeout(Duration::from_millis(150), scope.request()).await;
    assert!(cancelled.is_err());

    let starting = session.registry().cached("api").await.unwrap();
    let pid = starting.pid().unwrap();
    assert_eq!(starting.state(), ProcessState::Starting);
    assert!(starting.is_alive());

    assert!(session.registry().aclose().await.is_empty());
    assert!(session.registry().is_empty().await);
    assert_eq!(starting.state(), ProcessState::Terminated);
    assert!(!pid_exists(pid));

    scope.close().await;
    session.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_request_after_cancellation_replaces_starting_daemon() {
    let session = session();
    let ready = Arc::new(AtomicBool::new(false));
    let scope = session.create_daemon_scope(gated_spec("api", ready.clone()));

    let cancelled = tokio::time::timeout(Duration::from_millis(150), scope.request()).await;
    assert!(cancelled.is_err());
    let starting = session.registry().cached("api").await.unwrap();
    let stale_pid = starting.pid().unwrap();

    ready.store(true, Ordering::SeqCst);
    let handle = scope.request().await.unwrap();

    assert!(!handle.same_instance(&starting));
    assert_ne!(handle.pid(), Some(stale_pid));
    assert_eq!(handle.state(), ProcessState::Healthy);
    assert_eq!(starting.state(), ProcessState::Terminated);
    assert!(!pid_exists(stale_pid));

    scope.close().await;
    session.shutdown().await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
#[serial]
async fn test_session_shutdown_escalates_to_kill() {
    let session = session();
    let spec = sh_builder("stubborn", "trap '' TERM; while true; do sleep 0.05; done")
        .health_check_fn(|_probe| async { anyhow::Ok(true) })
        .shutdown_signal(ShutdownSignal::Terminate)
        .shutdown_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);
    let handle = scope.request().await.unwrap();
    // Let the shell install the trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let warnings = session.registry().aclose().await;

    assert!(warnings.is_empty());
    assert_eq!(handle.state(), ProcessState::Terminated);
    assert!(!handle.is_alive());
    assert!(started.elapsed() < Duration::from_secs(5));

    scope.close().await;
    session.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_stdout_is_forwarded_to_handler() {
    let session = session();
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let spec = sh_builder("chatty", "echo hello; echo world >&2; exec sleep 30")
        .health_check_fn(|_probe| async { anyhow::Ok(true) })
        .stdout_handler(Arc::new(move |line: &str| sink.lock().push(line.to_string())))
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);
    scope.request().await.unwrap();

    assert!(eventually(Duration::from_secs(5), || !lines.lock().is_empty()).await);
    assert_eq!(*lines.lock(), ["hello"]);

    scope.close().await;
    session.shutdown().await;
}

// =============================================================================
// HTTP readiness
// =============================================================================

#[tokio::test]
#[serial]
async fn test_ping_readiness_waits_for_2xx() {
    let server = Arc::new(PingServer::start_not_ready().await);
    let session = session();
    let spec = sh_builder("pinged", "exec sleep 30")
        .ping_url(server.url("/health"))
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);

    let flip = server.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        flip.set_ready(true);
    });

    let handle = scope.request().await.unwrap();
    assert_eq!(handle.state(), ProcessState::Healthy);
    assert!(server.hits() >= 2);

    scope.close().await;
    session.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_ping_accepts_configured_codes() {
    let server = PingServer::start_not_ready().await;
    let session = session();
    let spec = sh_builder("accepts-503", "exec sleep 30")
        .ping_url(server.url("/health"))
        .ping_response_codes(vec![503])
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);

    scope.request().await.unwrap();
    assert_eq!(server.hits(), 1);

    scope.close().await;
    session.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_predicate_probe_can_use_shared_client() {
    let server = PingServer::start().await;
    let url = server.url("/health");
    let session = session();
    let spec = sh_builder("probe", "exec sleep 30")
        .health_check_fn(move |probe| {
            let url = url.clone();
            async move {
                assert!(probe.pid().is_some());
                let response = probe.client().get(&url).send().await?;
                anyhow::Ok(response.status().is_success())
            }
        })
        .build()
        .unwrap();
    let scope = session.create_daemon_scope(spec);

    scope.request().await.unwrap();
    assert_eq!(server.hits(), 1);

    scope.close().await;
    session.shutdown().await;
}
