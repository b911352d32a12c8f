// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Restart Backoff
//!
//! Delay applied before a failed manifold is started again. The policy is
//! configurable; the engine only relies on two properties: a failed worker is
//! eventually retried, and it is never retried faster than the policy's lower
//! bound.
//!
//! ```yaml
//! backoff:
//!   kind: exponential
//!   initial: 250ms
//!   max: 30s
//!   factor: 2.0
//!   jitter: 0.2
//!   reset_after: 1m
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay after every failure.
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },

    /// `initial * factor^(failures - 1)`, capped at `max`, minus up to
    /// `jitter` of itself so that manifolds failing together spread out.
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        #[serde(default = "default_factor")]
        factor: f64,
        #[serde(default = "default_jitter")]
        jitter: f64,
        /// A worker that stayed up this long has its failure count reset.
        #[serde(default = "default_reset_after", with = "humantime_serde")]
        reset_after: Duration,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(30),
            factor: default_factor(),
            jitter: default_jitter(),
            reset_after: default_reset_after(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the restart that follows the `failures`-th consecutive failure.
    pub fn delay(&self, failures: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { jitter, .. } => {
                let base = self.base_delay(failures);
                if *jitter <= 0.0 {
                    return base;
                }
                let spread = rand::rng().random_range(0.0..=*jitter);
                base.mul_f64(1.0 - spread)
            }
        }
    }

    /// Shortest delay the policy can produce.
    pub fn min_delay(&self) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { initial, jitter, .. } => initial.mul_f64(1.0 - jitter.clamp(0.0, 1.0)),
        }
    }

    /// Uptime after which a worker's earlier failures are forgotten.
    pub fn reset_after(&self) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { reset_after, .. } => *reset_after,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Fixed { delay } => {
                if delay.is_zero() {
                    return Err("fixed backoff delay must be greater than zero".to_string());
                }
            }
            Self::Exponential {
                initial,
                max,
                factor,
                jitter,
                ..
            } => {
                if initial.is_zero() {
                    return Err("exponential backoff initial delay must be greater than zero".to_string());
                }
                if max < initial {
                    return Err(format!("backoff max ({max:?}) is shorter than initial ({initial:?})"));
                }
                if !factor.is_finite() || *factor < 1.0 {
                    return Err(format!("backoff factor must be at least 1.0, got {factor}"));
                }
                if !(0.0..1.0).contains(jitter) {
                    return Err(format!("backoff jitter must be within [0, 1), got {jitter}"));
                }
            }
        }
        Ok(())
    }

    fn base_delay(&self, failures: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial, max, factor, ..
            } => {
                let exponent = failures.saturating_sub(1).min(64) as i32;
                let scaled = initial.as_secs_f64() * factor.powi(exponent);
                if !scaled.is_finite() || scaled >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

fn default_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_reset_after() -> Duration {
    Duration::from_secs(60)
}
