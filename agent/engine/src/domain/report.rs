// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Engine Reports
//!
//! Immutable snapshots of engine state, produced by the control loop on
//! request and safe to serialize for diagnostics tooling.

use crate::domain::config::EngineId;
use crate::domain::manifold::ManifoldName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifoldState {
    /// No worker, and nothing scheduled.
    Stopped,
    /// A start attempt is in flight.
    Starting,
    /// A worker is running.
    Started,
    /// A worker is running and has been asked to stop.
    Stopping,
    /// The last worker failed; a restart is scheduled after backoff.
    Failed,
    /// The engine is shutting down; this manifold will not run again.
    Terminated,
}

impl fmt::Display for ManifoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Started,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifoldReport {
    pub state: ManifoldState,
    pub inputs: Vec<ManifoldName>,
    /// Whether some installed manifold lists this one as an input.
    pub is_input: bool,
    /// Most recent failure, cleared by a clean run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_count: u64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Diagnostics reported by the running worker itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    pub engine_id: EngineId,
    pub state: EngineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub manifolds: BTreeMap<ManifoldName, ManifoldReport>,
    pub generated_at: DateTime<Utc>,
}

impl EngineReport {
    pub fn manifold(&self, name: &str) -> Option<&ManifoldReport> {
        self.manifolds.get(name)
    }

    pub fn state_of(&self, name: &str) -> Option<ManifoldState> {
        self.manifold(name).map(|report| report.state)
    }

    /// Names of manifolds currently in `state`, in name order.
    pub fn in_state(&self, state: ManifoldState) -> Vec<&ManifoldName> {
        self.manifolds
            .iter()
            .filter(|(_, report)| report.state == state)
            .map(|(name, _)| name)
            .collect()
    }
}
