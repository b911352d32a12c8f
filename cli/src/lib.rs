// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Keystone agent host library - exposes testable components
//!
//! - [`builtin`]: manifolds every agent installs (`clock`, `status-reporter`)
//! - [`commands`]: `keystone` subcommand implementations

pub mod builtin;
pub mod commands;
