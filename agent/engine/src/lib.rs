// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # `keystone-engine`: Dependency Engine for Agent Workers
//!
//! Runs an agent's subsystems as independently restartable workers whose
//! start order, stop order and liveness are derived from a declared
//! dependency graph of **manifolds**.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Manifold`, `Worker`, `Context`, graph validation, backoff, reports, events, config |
//! | [`application`] | Application | `Engine` handle and its control loop |
//! | [`infrastructure`] | Infrastructure | `EventBus`, `TaskWorker`, `ValueWorker` |
//!
//! ## Key Concepts
//!
//! - **Manifold**: named inputs, a start function and an optional output function.
//! - **Worker**: whatever a start function returns; the engine kills it and waits for it.
//! - **Output accessor**: [`Context::get`] hands a dependent a typed view of an input's
//!   live worker, failing with `NotAvailable` or `WrongShape` instead of casting blindly.
//! - **Bounce**: a worker exiting with [`WorkerError::Bounce`] is restarted without backoff.
//!
//! ```no_run
//! use keystone_engine::{Engine, EngineConfig, Manifold, ValueWorker, WorkerError};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(EngineConfig::default())?;
//! engine
//!     .install(
//!         "agent-tag",
//!         Manifold::new(|_ctx| async { Ok::<_, WorkerError>(ValueWorker::new("machine-42".to_string())) })
//!             .with_output(ValueWorker::<String>::output()),
//!     )
//!     .await?;
//! engine.kill();
//! engine.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use application::Engine;
pub use domain::*;
pub use infrastructure::{EventBus, EventReceiver, TaskWorker, ValueWorker};
