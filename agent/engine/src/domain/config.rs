// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Engine configuration and engine-level errors.

use crate::domain::backoff::BackoffPolicy;
use crate::domain::manifold::ManifoldName;
use crate::domain::worker::WorkerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Decides whether a worker error should take the whole engine down.
pub type FatalPredicate = Arc<dyn Fn(&WorkerError) -> bool + Send + Sync>;

/// Identifies one engine instance in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineId(pub Uuid);

impl EngineId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
pub struct EngineConfig {
    /// Delay policy for restarting failed workers.
    pub backoff: BackoffPolicy,
    /// Delay before restarting a bounced worker. Zero restarts immediately.
    pub bounce_delay: Duration,
    /// Buffered events per subscriber before the slowest one starts lagging.
    pub event_capacity: usize,
    /// Errors for which this returns true kill the engine.
    pub is_fatal: Option<FatalPredicate>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            bounce_delay: Duration::ZERO,
            event_capacity: 256,
            is_fatal: None,
        }
    }
}

impl EngineConfig {
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_fatal(mut self, is_fatal: impl Fn(&WorkerError) -> bool + Send + Sync + 'static) -> Self {
        self.is_fatal = Some(Arc::new(is_fatal));
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.backoff.validate().map_err(EngineError::InvalidConfig)?;
        if self.event_capacity == 0 {
            return Err(EngineError::InvalidConfig("event_capacity must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub(crate) fn is_fatal(&self, err: &WorkerError) -> bool {
        err.is_failure() && self.is_fatal.as_ref().is_some_and(|is_fatal| is_fatal(err))
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("backoff", &self.backoff)
            .field("bounce_delay", &self.bounce_delay)
            .field("event_capacity", &self.event_capacity)
            .field("is_fatal", &self.is_fatal.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("manifold \"{manifold}\" depends on unknown input \"{input}\"")]
    UnknownInput {
        manifold: ManifoldName,
        input: ManifoldName,
    },

    #[error("manifold \"{0}\" is already installed")]
    AlreadyInstalled(ManifoldName),

    #[error("dependency cycle between {0:?}")]
    CycleDetected(Vec<ManifoldName>),

    #[error("manifold \"{manifold}\" lists input \"{input}\" more than once")]
    DuplicateInput {
        manifold: ManifoldName,
        input: ManifoldName,
    },

    #[error("invalid manifold name \"{0}\"")]
    InvalidName(ManifoldName),

    #[error("manifold \"{0}\" is not installed")]
    UnknownManifold(ManifoldName),

    #[error("engine is stopping")]
    EngineStopped,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("fatal worker error in \"{manifold}\": {error}")]
    Fatal {
        manifold: ManifoldName,
        error: WorkerError,
    },
}
