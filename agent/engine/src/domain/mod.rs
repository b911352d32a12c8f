// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Engine Domain Layer
//!
//! Pure types for the dependency engine. Nothing in here spawns tasks.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`manifold`] | `ManifoldName`, `Manifold`, `Manifolds` |
//! | [`worker`] | `Worker`, `WorkerError` |
//! | [`output`] | `OutputFn`, `Outputs`, `OutputError` |
//! | [`context`] | `Context`, `ContextBuilder`, `ResourceError` |
//! | [`graph`] | install-time validation and ordering |
//! | [`backoff`] | `BackoffPolicy` |
//! | [`report`] | `EngineReport`, `ManifoldReport`, `ManifoldState` |
//! | [`events`] | `EngineEvent` |
//! | [`config`] | `EngineConfig`, `EngineError` |
//! | [`agent_config`] | `AgentConfig` YAML settings and discovery |

pub mod agent_config;
pub mod backoff;
pub mod config;
pub mod context;
pub mod events;
pub mod graph;
pub mod manifold;
pub mod output;
pub mod report;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use config::{EngineConfig, EngineError, EngineId, FatalPredicate};
pub use context::{Context, ContextBuilder, ResourceError};
pub use events::{EngineEvent, ExitKind};
pub use manifold::{FilterFn, Manifold, ManifoldName, Manifolds, StartFn};
pub use output::{OutputError, OutputFn, Outputs};
pub use report::{EngineReport, EngineState, ManifoldReport, ManifoldState};
pub use worker::{Worker, WorkerError};
