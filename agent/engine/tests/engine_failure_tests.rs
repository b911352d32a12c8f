// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

mod common;

use common::{expect_event, restart_delay, start_order, started, stop_order, stopped, Switchboard, PATIENCE};
use keystone_engine::{
    BackoffPolicy, Context, Engine, EngineConfig, EngineError, EngineEvent, ExitKind, Manifold, ManifoldState,
    Manifolds, ValueWorker, WorkerError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};

#[derive(Debug, thiserror::Error)]
#[error("agent credentials revoked")]
struct Revoked;

fn fixed(delay: Duration) -> EngineConfig {
    EngineConfig::default().with_backoff(BackoffPolicy::Fixed { delay })
}

fn chain(board: &Switchboard) -> Manifolds {
    let mut batch = Manifolds::new();
    batch.insert("agent".into(), board.manifold("agent", &[]));
    batch.insert("api-caller".into(), board.manifold("api-caller", &["agent"]));
    batch.insert("upgrader".into(), board.manifold("upgrader", &["api-caller"]));
    batch
}

/// Start function that reports `NotYetAvailable` for its first `misses` attempts.
fn flaky(misses: usize, error: fn() -> WorkerError) -> (Manifold, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let manifold = Manifold::new(move |_ctx| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < misses {
                return Err(error());
            }
            Ok(ValueWorker::new(attempt))
        }
    });
    (manifold, attempts)
}

#[tokio::test(start_paused = true)]
async fn test_failed_input_stops_dependents_and_relights_after_backoff() {
    let board = Switchboard::default();
    let engine = Engine::new(fixed(Duration::from_secs(5))).unwrap();
    let mut events = engine.subscribe();

    engine.install_all(chain(&board)).await.unwrap();
    start_order(&mut events, 3).await;

    board.exit("agent", Err(WorkerError::msg("connection reset by peer")));
    let (exit, error) = stopped(&mut events, "agent").await;
    assert_eq!(exit, ExitKind::Failed);
    assert_eq!(error.as_deref(), Some("connection reset by peer"));
    assert_eq!(restart_delay(&mut events, "agent").await, Duration::from_secs(5));

    let report = engine.report().await.unwrap();
    let agent = report.manifold("agent").unwrap();
    assert_eq!(agent.state, ManifoldState::Failed);
    assert_eq!(agent.consecutive_failures, 1);
    assert_eq!(agent.error.as_deref(), Some("connection reset by peer"));

    assert_eq!(stop_order(&mut events, 2).await, vec!["upgrader", "api-caller"]);
    assert_eq!(
        start_order(&mut events, 3).await,
        vec!["agent", "api-caller", "upgrader"]
    );

    let report = engine.report().await.unwrap();
    assert_eq!(report.manifold("agent").unwrap().start_count, 2);
    assert_eq!(report.manifold("upgrader").unwrap().start_count, 2);
    assert_eq!(report.in_state(ManifoldState::Started).len(), 3);

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dependents_waiting_to_stop_are_not_reported_started() {
    let board = Switchboard::default();
    let engine = Engine::new(fixed(Duration::from_secs(3600))).unwrap();
    let mut events = engine.subscribe();

    let mut batch = Manifolds::new();
    batch.insert("agent".into(), board.manifold("agent", &[]));
    batch.insert("api-caller".into(), board.manifold("api-caller", &["agent"]));
    batch.insert(
        "upgrader".into(),
        board.lingering("upgrader", &["api-caller"], Duration::from_secs(10)),
    );
    engine.install_all(batch).await.unwrap();
    start_order(&mut events, 3).await;

    board.exit("agent", Err(WorkerError::msg("connection reset by peer")));
    assert_eq!(stopped(&mut events, "agent").await.0, ExitKind::Failed);

    // api-caller still has a worker but is queued behind the slow upgrader
    let report = engine.report().await.unwrap();
    assert_eq!(report.state_of("agent"), Some(ManifoldState::Failed));
    assert_eq!(report.state_of("api-caller"), Some(ManifoldState::Stopping));
    assert_eq!(report.state_of("upgrader"), Some(ManifoldState::Stopping));
    assert!(report.manifold("api-caller").unwrap().started_at.is_some());

    let before = Instant::now();
    assert_eq!(stopped(&mut events, "upgrader").await.0, ExitKind::Requested);
    assert!(before.elapsed() >= Duration::from_secs(10));
    assert_eq!(stopped(&mut events, "api-caller").await.0, ExitKind::Requested);

    let report = engine.report().await.unwrap();
    assert_eq!(report.state_of("api-caller"), Some(ManifoldState::Stopped));
    assert_eq!(report.state_of("upgrader"), Some(ManifoldState::Stopped));

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_input_failure_aborts_a_pending_start() {
    let board = Switchboard::default();
    let engine = Engine::new(fixed(Duration::from_secs(5))).unwrap();
    let mut events = engine.subscribe();

    let (aborted_tx, aborted_rx) = oneshot::channel();
    let aborted_tx = Arc::new(Mutex::new(Some(aborted_tx)));
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    // the first start never finishes on its own
    let upgrader = Manifold::new(move |ctx: Context| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        let aborted_tx = aborted_tx.clone();
        async move {
            if attempt == 0 {
                let abort = ctx.abort();
                tokio::spawn(async move {
                    abort.cancelled().await;
                    if let Some(tx) = aborted_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                });
                std::future::pending::<()>().await;
            }
            Ok::<_, WorkerError>(ValueWorker::new(attempt))
        }
    })
    .with_inputs(["agent"]);

    let mut batch = Manifolds::new();
    batch.insert("agent".into(), board.manifold("agent", &[]));
    batch.insert("upgrader".into(), upgrader);
    engine.install_all(batch).await.unwrap();
    expect_event(&mut events, |event| {
        matches!(event, EngineEvent::WorkerStarting { manifold, .. } if manifold.as_str() == "upgrader")
    })
    .await;

    board.exit("agent", Err(WorkerError::msg("connection reset by peer")));
    assert_eq!(stopped(&mut events, "agent").await.0, ExitKind::Failed);
    let (exit, error) = stopped(&mut events, "upgrader").await;
    assert_eq!(exit, ExitKind::Requested);
    assert_eq!(error, None);
    timeout(PATIENCE, aborted_rx).await.unwrap().unwrap();

    let report = engine.report().await.unwrap();
    let upgrader = report.manifold("upgrader").unwrap();
    assert_eq!(upgrader.state, ManifoldState::Stopped);
    assert_eq!(upgrader.start_count, 0);
    assert!(upgrader.worker.is_none() && upgrader.started_at.is_none());

    assert_eq!(start_order(&mut events, 2).await, vec!["agent", "upgrader"]);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(
        engine.report().await.unwrap().manifold("upgrader").unwrap().start_count,
        1
    );

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_error_is_retried_with_growing_backoff() {
    let policy = BackoffPolicy::Exponential {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(3),
        factor: 2.0,
        jitter: 0.0,
        reset_after: Duration::from_secs(60),
    };
    let engine = Engine::new(EngineConfig::default().with_backoff(policy)).unwrap();
    let mut events = engine.subscribe();
    let (manifold, attempts) = flaky(3, || WorkerError::msg("api server unreachable"));

    engine.install("api-caller", manifold).await.unwrap();
    assert_eq!(restart_delay(&mut events, "api-caller").await, Duration::from_secs(1));
    assert_eq!(restart_delay(&mut events, "api-caller").await, Duration::from_secs(2));
    assert_eq!(restart_delay(&mut events, "api-caller").await, Duration::from_secs(3));
    assert_eq!(started(&mut events, "api-caller").await, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    let report = engine.report().await.unwrap();
    assert_eq!(report.manifold("api-caller").unwrap().consecutive_failures, 3);

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failure_count_resets_after_stable_uptime() {
    let policy = BackoffPolicy::Exponential {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(60),
        factor: 2.0,
        jitter: 0.0,
        reset_after: Duration::from_secs(10),
    };
    let board = Switchboard::default();
    let engine = Engine::new(EngineConfig::default().with_backoff(policy)).unwrap();
    let mut events = engine.subscribe();

    engine.install("agent", board.manifold("agent", &[])).await.unwrap();
    started(&mut events, "agent").await;

    board.exit("agent", Err(WorkerError::msg("lost lease")));
    assert_eq!(restart_delay(&mut events, "agent").await, Duration::from_secs(1));
    started(&mut events, "agent").await;

    board.exit("agent", Err(WorkerError::msg("lost lease")));
    assert_eq!(restart_delay(&mut events, "agent").await, Duration::from_secs(2));
    started(&mut events, "agent").await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    board.exit("agent", Err(WorkerError::msg("lost lease")));
    assert_eq!(restart_delay(&mut events, "agent").await, Duration::from_secs(1));

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missing_dependency_parks_until_input_changes() {
    let board = Switchboard::default();
    let engine = Engine::new(fixed(Duration::from_secs(3600))).unwrap();
    let mut events = engine.subscribe();
    let (manifold, attempts) = flaky(1, || WorkerError::NotYetAvailable);

    engine.install("agent", board.manifold("agent", &[])).await.unwrap();
    engine
        .install("identity-file-writer", manifold.with_inputs(["agent"]))
        .await
        .unwrap();

    let (exit, error) = stopped(&mut events, "identity-file-writer").await;
    assert_eq!(exit, ExitKind::Missing);
    assert_eq!(error.as_deref(), Some("dependency not available"));

    let report = engine.report().await.unwrap();
    let writer = report.manifold("identity-file-writer").unwrap();
    assert_eq!(writer.state, ManifoldState::Stopped);
    assert!(writer.error.is_none());
    assert_eq!(writer.consecutive_failures, 0);

    board.exit("agent", Err(WorkerError::Bounce));
    assert_eq!(started(&mut events, "identity-file-writer").await, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_clean_exit_parks_until_input_changes() {
    let board = Switchboard::default();
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut events = engine.subscribe();

    engine.install("agent", board.manifold("agent", &[])).await.unwrap();
    engine
        .install("migrator", board.manifold("migrator", &["agent"]))
        .await
        .unwrap();
    started(&mut events, "migrator").await;

    board.exit("migrator", Ok(()));
    assert_eq!(stopped(&mut events, "migrator").await.0, ExitKind::Clean);
    assert_eq!(
        engine.report().await.unwrap().state_of("migrator"),
        Some(ManifoldState::Stopped)
    );

    board.exit("agent", Err(WorkerError::Bounce));
    assert_eq!(started(&mut events, "migrator").await, 2);

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bounce_restarts_without_backoff() {
    let board = Switchboard::default();
    let engine = Engine::new(fixed(Duration::from_secs(3600))).unwrap();
    let mut events = engine.subscribe();

    engine.install("agent", board.manifold("agent", &[])).await.unwrap();
    started(&mut events, "agent").await;

    let before = Instant::now();
    board.exit("agent", Err(WorkerError::Bounce));
    assert_eq!(stopped(&mut events, "agent").await.0, ExitKind::Bounced);
    assert_eq!(started(&mut events, "agent").await, 2);
    assert!(before.elapsed() < PATIENCE);

    let report = engine.report().await.unwrap();
    let agent = report.manifold("agent").unwrap();
    assert_eq!(agent.state, ManifoldState::Started);
    assert_eq!(agent.consecutive_failures, 0);
    assert!(agent.error.is_none());

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bounce_delay_spaces_out_restarts() {
    let board = Switchboard::default();
    let config = EngineConfig {
        bounce_delay: Duration::from_secs(2),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config).unwrap();
    let mut events = engine.subscribe();

    engine.install("agent", board.manifold("agent", &[])).await.unwrap();
    started(&mut events, "agent").await;

    let before = Instant::now();
    board.exit("agent", Err(WorkerError::Bounce));
    assert_eq!(restart_delay(&mut events, "agent").await, Duration::from_secs(2));
    assert_eq!(
        engine.report().await.unwrap().state_of("agent"),
        Some(ManifoldState::Stopped)
    );
    started(&mut events, "agent").await;
    assert!(before.elapsed() >= Duration::from_secs(2));

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_filter_can_turn_an_error_into_a_bounce() {
    let board = Switchboard::default();
    let engine = Engine::new(fixed(Duration::from_secs(3600))).unwrap();
    let mut events = engine.subscribe();

    let manifold = board.manifold("upgrader", &[]).with_filter(|err| {
        if err.to_string().contains("upgrade complete") {
            WorkerError::Bounce
        } else {
            err
        }
    });
    engine.install("upgrader", manifold).await.unwrap();
    started(&mut events, "upgrader").await;

    board.exit("upgrader", Err(WorkerError::msg("upgrade complete, restart required")));
    assert_eq!(stopped(&mut events, "upgrader").await.0, ExitKind::Bounced);
    assert_eq!(started(&mut events, "upgrader").await, 2);

    board.exit("upgrader", Err(WorkerError::msg("disk full")));
    assert_eq!(stopped(&mut events, "upgrader").await.0, ExitKind::Failed);

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_stops_the_engine() {
    let board = Switchboard::default();
    let config = EngineConfig::default().with_fatal(|err| err.downcast_ref::<Revoked>().is_some());
    let engine = Engine::new(config).unwrap();
    let mut events = engine.subscribe();

    engine.install_all(chain(&board)).await.unwrap();
    start_order(&mut events, 3).await;

    board.exit("api-caller", Err(WorkerError::failed(Revoked)));
    match engine.wait().await {
        Err(EngineError::Fatal { manifold, error }) => {
            assert_eq!(manifold.as_str(), "api-caller");
            assert!(error.downcast_ref::<Revoked>().is_some());
        }
        other => panic!("expected a fatal error, got {other:?}"),
    }

    let report = engine.report().await.unwrap();
    assert!(report.error.as_deref().unwrap().contains("agent credentials revoked"));
    assert_eq!(report.in_state(ManifoldState::Terminated).len(), 3);

    // a second wait sees the same outcome
    assert!(matches!(engine.wait().await, Err(EngineError::Fatal { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_worker_can_uninstall_its_own_manifold() {
    let board = Switchboard::default();
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut events = engine.subscribe();

    engine.install_all(chain(&board)).await.unwrap();
    start_order(&mut events, 3).await;

    board.exit("api-caller", Err(WorkerError::Uninstall));
    assert_eq!(stopped(&mut events, "api-caller").await.0, ExitKind::Uninstalled);
    assert_eq!(stopped(&mut events, "upgrader").await.0, ExitKind::Requested);
    expect_event(&mut events, |event| {
        matches!(event, EngineEvent::ManifoldUninstalled { manifold, .. } if manifold.as_str() == "api-caller")
    })
    .await;

    let report = engine.report().await.unwrap();
    assert!(report.manifold("api-caller").is_none());
    assert_eq!(report.state_of("agent"), Some(ManifoldState::Started));
    assert_eq!(report.state_of("upgrader"), Some(ManifoldState::Stopped));
    assert!(!report.manifold("agent").unwrap().is_input);

    engine.kill();
    engine.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_kill_cancels_pending_restarts() {
    let engine = Engine::new(fixed(Duration::from_secs(3600))).unwrap();
    let mut events = engine.subscribe();
    let (manifold, _) = flaky(usize::MAX, || WorkerError::msg("api server unreachable"));

    engine.install("api-caller", manifold).await.unwrap();
    restart_delay(&mut events, "api-caller").await;

    let before = Instant::now();
    engine.kill();
    engine.wait().await.unwrap();
    assert!(before.elapsed() < Duration::from_secs(1));
    assert_eq!(
        engine.report().await.unwrap().state_of("api-caller"),
        Some(ManifoldState::Terminated)
    );
}
