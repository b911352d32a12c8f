// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::manifold::ManifoldName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a worker (or a start attempt) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// Returned without error.
    Clean,
    /// Stopped because the engine asked it to.
    Requested,
    /// A dependency was missing.
    Missing,
    Bounced,
    Uninstalled,
    Failed,
}

/// Lifecycle events published by the engine to its subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ManifoldInstalled {
        manifold: ManifoldName,
        installed_at: DateTime<Utc>,
    },
    ManifoldUninstalled {
        manifold: ManifoldName,
        uninstalled_at: DateTime<Utc>,
    },
    WorkerStarting {
        manifold: ManifoldName,
        attempt: u64,
    },
    WorkerStarted {
        manifold: ManifoldName,
        start_count: u64,
        started_at: DateTime<Utc>,
    },
    StopRequested {
        manifold: ManifoldName,
    },
    WorkerStopped {
        manifold: ManifoldName,
        exit: ExitKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        stopped_at: DateTime<Utc>,
    },
    RestartScheduled {
        manifold: ManifoldName,
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    EngineStopping {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    EngineStopped {
        stopped_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// The manifold this event concerns, if any.
    pub fn manifold(&self) -> Option<&ManifoldName> {
        match self {
            Self::ManifoldInstalled { manifold, .. }
            | Self::ManifoldUninstalled { manifold, .. }
            | Self::WorkerStarting { manifold, .. }
            | Self::WorkerStarted { manifold, .. }
            | Self::StopRequested { manifold }
            | Self::WorkerStopped { manifold, .. }
            | Self::RestartScheduled { manifold, .. } => Some(manifold),
            Self::EngineStopping { .. } | Self::EngineStopped { .. } => None,
        }
    }
}
