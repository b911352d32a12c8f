// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure adapters: event fan-out and task-backed workers.

pub mod event_bus;
pub mod task_worker;

pub use event_bus::{EventBus, EventBusError, EventReceiver};
pub use task_worker::{TaskWorker, ValueWorker};
