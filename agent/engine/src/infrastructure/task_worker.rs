// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Ready-made [`Worker`] implementations backed by tokio tasks.
//!
//! - [`TaskWorker`] runs a future that watches a cancellation token.
//! - [`ValueWorker`] exposes a value to dependents until it is killed.

use crate::domain::output::{OutputFn, Outputs};
use crate::domain::worker::{Worker, WorkerError};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Worker running a single future on its own tokio task.
///
/// The future receives a [`CancellationToken`] that fires on [`Worker::kill`]
/// and is expected to return promptly once it does. A panic inside the
/// future is reported as a [`WorkerError::Failed`].
pub struct TaskWorker {
    cancel: CancellationToken,
    done: watch::Receiver<Option<Result<(), WorkerError>>>,
}

impl TaskWorker {
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (tx, done) = watch::channel(None);
        let task = run(cancel.clone());
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(panic = %message, "Worker task panicked");
                    Err(WorkerError::msg(format!("worker panicked: {message}")))
                }
            };
            let _ = tx.send(Some(result));
        });
        Self { cancel, done }
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }
}

#[async_trait]
impl Worker for TaskWorker {
    fn kill(&self) {
        self.cancel.cancel();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        let mut done = self.done.clone();
        let outcome = match done.wait_for(Option::is_some).await {
            Ok(result) => result.clone().unwrap_or(Ok(())),
            Err(_) => Err(WorkerError::msg("worker task ended without reporting a result")),
        };
        outcome
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker that holds a value for its dependents and does nothing else.
pub struct ValueWorker<T> {
    value: T,
    cancel: CancellationToken,
}

impl<T: Clone + Send + Sync + 'static> ValueWorker<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            cancel: CancellationToken::new(),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Output function serving a clone of the held value.
    pub fn output() -> OutputFn {
        Outputs::<Self>::new().provide::<T>(|worker| worker.value.clone()).build()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Worker for ValueWorker<T> {
    fn kill(&self) {
        self.cancel.cancel();
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        self.cancel.cancelled().await;
        Ok(())
    }
}
