// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

#![allow(dead_code)]

use keystone_engine::{EngineEvent, EventReceiver, ExitKind, Manifold, TaskWorker, WorkerError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Upper bound on any single wait. Time is paused in these tests, so this
/// only fires when the engine is stuck.
pub const PATIENCE: Duration = Duration::from_secs(600);

/// Hands out manifolds whose running workers the test can make exit at will.
#[derive(Clone, Default)]
pub struct Switchboard {
    exits: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Result<(), WorkerError>>>>>,
}

impl Switchboard {
    pub fn manifold(&self, name: &str, inputs: &[&str]) -> Manifold {
        self.lingering(name, inputs, Duration::ZERO)
    }

    /// Like [`Switchboard::manifold`], but a killed worker keeps running for
    /// `linger` before it exits.
    pub fn lingering(&self, name: &str, inputs: &[&str], linger: Duration) -> Manifold {
        let board = self.clone();
        let name = name.to_string();
        Manifold::new(move |_ctx| {
            let board = board.clone();
            let name = name.clone();
            async move {
                let (tx, mut exit) = mpsc::unbounded_channel();
                board.exits.lock().unwrap().insert(name, tx);
                Ok::<_, WorkerError>(TaskWorker::spawn(move |cancel| async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tokio::time::sleep(linger).await;
                            Ok(())
                        }
                        result = exit.recv() => result.unwrap_or(Ok(())),
                    }
                }))
            }
        })
        .with_inputs(inputs.iter().copied())
    }

    /// Make the most recently started worker of `name` exit with `result`.
    pub fn exit(&self, name: &str, result: Result<(), WorkerError>) {
        let exits = self.exits.lock().unwrap();
        exits[name].send(result).unwrap();
    }
}

pub async fn expect_event(
    events: &mut EventReceiver,
    predicate: impl FnMut(&EngineEvent) -> bool,
) -> EngineEvent {
    timeout(PATIENCE, events.wait_for(predicate))
        .await
        .expect("timed out waiting for engine event")
        .expect("event bus closed")
}

pub async fn started(events: &mut EventReceiver, name: &str) -> u64 {
    match expect_event(events, |event| {
        matches!(event, EngineEvent::WorkerStarted { manifold, .. } if manifold.as_str() == name)
    })
    .await
    {
        EngineEvent::WorkerStarted { start_count, .. } => start_count,
        other => unreachable!("{other:?}"),
    }
}

pub async fn stopped(events: &mut EventReceiver, name: &str) -> (ExitKind, Option<String>) {
    match expect_event(events, |event| {
        matches!(event, EngineEvent::WorkerStopped { manifold, .. } if manifold.as_str() == name)
    })
    .await
    {
        EngineEvent::WorkerStopped { exit, error, .. } => (exit, error),
        other => unreachable!("{other:?}"),
    }
}

pub async fn restart_delay(events: &mut EventReceiver, name: &str) -> Duration {
    match expect_event(events, |event| {
        matches!(event, EngineEvent::RestartScheduled { manifold, .. } if manifold.as_str() == name)
    })
    .await
    {
        EngineEvent::RestartScheduled { delay, .. } => delay,
        other => unreachable!("{other:?}"),
    }
}

/// Names from the next `count` `WorkerStarted` events, in order.
pub async fn start_order(events: &mut EventReceiver, count: usize) -> Vec<String> {
    let mut order = Vec::with_capacity(count);
    while order.len() < count {
        if let EngineEvent::WorkerStarted { manifold, .. } =
            expect_event(events, |event| matches!(event, EngineEvent::WorkerStarted { .. })).await
        {
            order.push(manifold.to_string());
        }
    }
    order
}

/// Names from the next `count` `StopRequested` events, in order.
pub async fn stop_order(events: &mut EventReceiver, count: usize) -> Vec<String> {
    let mut order = Vec::with_capacity(count);
    while order.len() < count {
        if let EngineEvent::StopRequested { manifold } =
            expect_event(events, |event| matches!(event, EngineEvent::StopRequested { .. })).await
        {
            order.push(manifold.to_string());
        }
    }
    order
}
