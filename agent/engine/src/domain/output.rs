// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Output Functions
//!
//! An output function exposes part of a running worker to the manifolds that
//! depend on it. The caller supplies a typed slot (`&mut Option<T>` erased to
//! `&mut dyn Any`); the output function fills it if it knows how to produce a
//! `T` from the worker, and reports [`OutputError::WrongShape`] otherwise.
//!
//! [`Outputs`] builds such a function from a list of per-shape accessors:
//!
//! ```
//! use keystone_engine::{Outputs, ValueWorker};
//!
//! let output = Outputs::<ValueWorker<String>>::new()
//!     .provide::<String>(|w| w.value().clone())
//!     .provide::<usize>(|w| w.value().len())
//!     .build();
//! # let _ = output;
//! ```

use crate::domain::worker::Worker;
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Extracts a typed view of a running worker into a caller-supplied slot.
pub type OutputFn = Arc<dyn Fn(&dyn Worker, &mut dyn Any) -> Result<(), OutputError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    /// The worker cannot be viewed as the requested type.
    #[error("output shape not supported")]
    WrongShape,

    /// The worker is running but cannot currently serve the output.
    #[error("output not available: {0}")]
    NotAvailable(String),
}

type Provider<W> = Box<dyn Fn(&W, &mut dyn Any) -> bool + Send + Sync>;

/// Builder for an [`OutputFn`] serving one or more typed shapes of worker `W`.
pub struct Outputs<W> {
    providers: Vec<(TypeId, Provider<W>)>,
    _worker: PhantomData<fn(&W)>,
}

impl<W: Worker> Outputs<W> {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            _worker: PhantomData,
        }
    }

    /// Serve requests for `T` by applying `extract` to the live worker.
    pub fn provide<T: Any>(mut self, extract: impl Fn(&W) -> T + Send + Sync + 'static) -> Self {
        let provider: Provider<W> = Box::new(move |worker, slot| match slot.downcast_mut::<Option<T>>() {
            Some(slot) => {
                *slot = Some(extract(worker));
                true
            }
            None => false,
        });
        self.providers.push((TypeId::of::<Option<T>>(), provider));
        self
    }

    pub fn build(self) -> OutputFn {
        let providers = self.providers;
        Arc::new(move |worker: &dyn Worker, slot: &mut dyn Any| {
            let any: &dyn Any = worker;
            let worker = any.downcast_ref::<W>().ok_or(OutputError::WrongShape)?;
            let requested = (*slot).type_id();
            for (shape, provide) in &providers {
                if *shape == requested && provide(worker, slot) {
                    return Ok(());
                }
            }
            Err(OutputError::WrongShape)
        })
    }
}

impl<W: Worker> Default for Outputs<W> {
    fn default() -> Self {
        Self::new()
    }
}
