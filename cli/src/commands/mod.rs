// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Keystone CLI

pub mod config;
pub mod run;

pub use self::config::ConfigCommand;
