// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Built-in manifolds
//!
//! | Manifold | Inputs | Output |
//! |----------|--------|--------|
//! | `clock` | none | `watch::Receiver<u64>` tick counter |
//! | `status-reporter` | `clock` | none; logs an engine summary every tick |

use async_trait::async_trait;
use keystone_engine::{
    Engine, Manifold, ManifoldState, Manifolds, OutputFn, Outputs, TaskWorker, Worker, WorkerError,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

pub const CLOCK: &str = "clock";
pub const STATUS_REPORTER: &str = "status-reporter";

/// Every built-in manifold, ready for [`Engine::install_all`].
pub fn manifolds(engine: &Engine, heartbeat: Duration) -> Manifolds {
    let mut manifolds = Manifolds::new();
    manifolds.insert(CLOCK.into(), clock(heartbeat));
    manifolds.insert(STATUS_REPORTER.into(), status_reporter(engine.clone()));
    manifolds
}

/// Worker that counts heartbeat intervals.
pub struct Clock {
    ticks: watch::Receiver<u64>,
    task: TaskWorker,
}

impl Clock {
    pub fn start(interval: Duration) -> Self {
        let (tx, ticks) = watch::channel(0);
        let task = TaskWorker::spawn(move |cancel| async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok::<(), WorkerError>(()),
                    _ = timer.tick() => tx.send_modify(|count| *count += 1),
                }
            }
        });
        Self { ticks, task }
    }

    pub fn output() -> OutputFn {
        Outputs::<Clock>::new()
            .provide::<watch::Receiver<u64>>(|clock| clock.ticks.clone())
            .build()
    }
}

#[async_trait]
impl Worker for Clock {
    fn kill(&self) {
        self.task.kill();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        self.task.wait().await
    }

    fn report(&self) -> Option<serde_json::Value> {
        Some(json!({ "ticks": *self.ticks.borrow() }))
    }
}

pub fn clock(interval: Duration) -> Manifold {
    Manifold::new(move |_ctx| async move { Ok::<_, WorkerError>(Clock::start(interval)) }).with_output(Clock::output())
}

/// Logs a one-line summary of `engine` on every clock tick.
pub fn status_reporter(engine: Engine) -> Manifold {
    Manifold::new(move |ctx| {
        let engine = engine.clone();
        async move {
            let mut ticks: watch::Receiver<u64> = ctx.get(CLOCK)?;
            Ok::<_, WorkerError>(TaskWorker::spawn(move |cancel| async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok::<(), WorkerError>(()),
                        changed = ticks.changed() => {
                            // clock went away; wait for it to come back
                            if changed.is_err() {
                                return Err(WorkerError::NotYetAvailable);
                            }
                            let tick = *ticks.borrow_and_update();
                            let report = engine.report().await.map_err(WorkerError::failed)?;
                            info!(
                                tick,
                                started = report.in_state(ManifoldState::Started).len(),
                                failed = report.in_state(ManifoldState::Failed).len(),
                                "Agent status"
                            );
                        }
                    }
                }
            }))
        }
    })
    .with_inputs([CLOCK])
}
