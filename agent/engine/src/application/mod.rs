// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: the [`Engine`] handle and the control loop behind it.

pub mod engine;

pub use engine::Engine;
