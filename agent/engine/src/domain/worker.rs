// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Worker Contract
//!
//! A [`Worker`] is whatever a manifold's start function hands back. The engine
//! only ever asks it to stop ([`Worker::kill`]) and waits for its outcome
//! ([`Worker::wait`]). How a worker exits decides what the engine does next:
//!
//! | Outcome | Engine reaction |
//! |---------|-----------------|
//! | `Ok(())` | parked until one of its inputs changes |
//! | [`WorkerError::NotYetAvailable`] | parked, never logged as a failure |
//! | [`WorkerError::Bounce`] | restarted without backoff |
//! | [`WorkerError::Uninstall`] | manifold removed from the engine |
//! | [`WorkerError::Failed`] | `failed`, restarted after backoff |

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A unit of running work owned by the engine.
///
/// `wait` may be called from a task other than the one that created the
/// worker, and must return once the worker has fully stopped. `kill` must not
/// block; it only requests the stop.
#[async_trait]
pub trait Worker: Any + Send + Sync {
    /// Ask the worker to stop. Idempotent.
    fn kill(&self);

    /// Resolve with the worker's exit outcome.
    async fn wait(&self) -> Result<(), WorkerError>;

    /// Optional worker-specific diagnostics included in engine reports.
    fn report(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Exit outcome of a start function or a running worker.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// A dependency is missing or not ready yet. Not a failure.
    #[error("dependency not available")]
    NotYetAvailable,

    /// The worker asks to be restarted straight away.
    #[error("restart immediately")]
    Bounce,

    /// The worker asks for its manifold to be removed from the engine.
    #[error("uninstall manifold")]
    Uninstall,

    /// A genuine failure.
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),
}

impl WorkerError {
    /// Wrap any error as a [`WorkerError::Failed`].
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Arc::new(err.into()))
    }

    /// Build a [`WorkerError::Failed`] from a message.
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Failed(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Downcast the wrapped failure, if any.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Failed(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for WorkerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(Arc::new(err))
    }
}
