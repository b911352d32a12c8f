// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Start Context
//!
//! The [`Context`] handed to a start function is a snapshot of its inputs
//! taken by the control loop at the moment the start was scheduled. An input
//! that was not `started` at that moment is recorded as unavailable. Any later
//! change to an input makes the engine stop the dependent, so a start function
//! never builds on a view the engine no longer stands behind.
//!
//! The context expires as soon as the start function returns; a worker that
//! keeps it around gets [`ResourceError::Expired`] from then on.

use crate::domain::manifold::ManifoldName;
use crate::domain::output::{OutputError, OutputFn};
use crate::domain::worker::{Worker, WorkerError};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Fills a typed slot from one input's live worker.
pub(crate) type Getter = Arc<dyn Fn(&mut dyn Any) -> Result<(), OutputError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("\"{0}\" is not a declared input")]
    UnknownName(ManifoldName),

    #[error("\"{0}\" is not available")]
    NotAvailable(ManifoldName),

    #[error("\"{input}\" cannot be viewed as {expected}")]
    WrongShape {
        input: ManifoldName,
        expected: &'static str,
    },

    #[error("context for \"{0}\" used after its start function returned")]
    Expired(ManifoldName),
}

impl From<ResourceError> for WorkerError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::NotAvailable(_) => WorkerError::NotYetAvailable,
            other => WorkerError::failed(other),
        }
    }
}

pub struct Context {
    name: ManifoldName,
    inputs: HashMap<ManifoldName, Option<Getter>>,
    expired: Arc<AtomicBool>,
    abort: CancellationToken,
}

impl Context {
    pub(crate) fn new(
        name: ManifoldName,
        inputs: HashMap<ManifoldName, Option<Getter>>,
        expired: Arc<AtomicBool>,
        abort: CancellationToken,
    ) -> Self {
        Self {
            name,
            inputs,
            expired,
            abort,
        }
    }

    /// Start a stub context for exercising a start function without an engine.
    pub fn builder(name: impl Into<ManifoldName>) -> ContextBuilder {
        ContextBuilder {
            name: name.into(),
            inputs: HashMap::new(),
        }
    }

    /// Name of the manifold being started.
    pub fn name(&self) -> &ManifoldName {
        &self.name
    }

    /// Cancelled when the engine gives up on this start attempt.
    pub fn abort(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Fetch a typed view of `input`'s running worker.
    pub fn get<T: Any>(&self, input: &str) -> Result<T, ResourceError> {
        let getter = self.resource(input)?;
        let mut slot: Option<T> = None;
        getter(&mut slot).map_err(|err| match err {
            OutputError::WrongShape => ResourceError::WrongShape {
                input: ManifoldName::from(input),
                expected: type_name::<T>(),
            },
            OutputError::NotAvailable(_) => ResourceError::NotAvailable(ManifoldName::from(input)),
        })?;
        slot.ok_or_else(|| ResourceError::WrongShape {
            input: ManifoldName::from(input),
            expected: type_name::<T>(),
        })
    }

    /// Check that `input` is running without reading anything from it.
    pub fn require(&self, input: &str) -> Result<(), ResourceError> {
        self.resource(input).map(|_| ())
    }

    fn resource(&self, input: &str) -> Result<&Getter, ResourceError> {
        if self.expired.load(Ordering::Acquire) {
            return Err(ResourceError::Expired(self.name.clone()));
        }
        self.inputs
            .get(input)
            .ok_or_else(|| ResourceError::UnknownName(ManifoldName::from(input)))?
            .as_ref()
            .ok_or_else(|| ResourceError::NotAvailable(ManifoldName::from(input)))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut inputs: Vec<_> = self
            .inputs
            .iter()
            .map(|(name, getter)| (name.as_str(), getter.is_some()))
            .collect();
        inputs.sort();
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("inputs", &inputs)
            .field("expired", &self.expired.load(Ordering::Acquire))
            .finish()
    }
}

/// Build the getter the engine hands out for a started input.
pub(crate) fn worker_getter(worker: Arc<dyn Worker>, output: Option<OutputFn>) -> Getter {
    Arc::new(move |slot: &mut dyn Any| match &output {
        Some(output) => output(worker.as_ref(), slot),
        None => Err(OutputError::WrongShape),
    })
}

/// Stub [`Context`] with canned inputs, for unit-testing start functions.
pub struct ContextBuilder {
    name: ManifoldName,
    inputs: HashMap<ManifoldName, Option<Getter>>,
}

impl ContextBuilder {
    /// Declare `input` as running and serving `value`.
    pub fn with_resource<T>(mut self, input: impl Into<ManifoldName>, value: T) -> Self
    where
        T: Any + Clone + Send + Sync,
    {
        let getter: Getter = Arc::new(move |slot: &mut dyn Any| match slot.downcast_mut::<Option<T>>() {
            Some(slot) => {
                *slot = Some(value.clone());
                Ok(())
            }
            None => Err(OutputError::WrongShape),
        });
        self.inputs.insert(input.into(), Some(getter));
        self
    }

    /// Declare `input` as running and exposing `worker` through `output`.
    pub fn with_worker(mut self, input: impl Into<ManifoldName>, worker: Arc<dyn Worker>, output: OutputFn) -> Self {
        self.inputs.insert(input.into(), Some(worker_getter(worker, Some(output))));
        self
    }

    /// Declare `input` without making it available.
    pub fn with_missing(mut self, input: impl Into<ManifoldName>) -> Self {
        self.inputs.insert(input.into(), None);
        self
    }

    pub fn build(self) -> Context {
        Context::new(
            self.name,
            self.inputs,
            Arc::new(AtomicBool::new(false)),
            CancellationToken::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_typed_resource() {
        let ctx = Context::builder("identity-file-writer")
            .with_resource("agent", "machine-42".to_string())
            .build();

        let tag: String = ctx.get("agent").unwrap();
        assert_eq!(tag, "machine-42");
        assert!(ctx.require("agent").is_ok());
        assert_eq!(ctx.name().as_str(), "identity-file-writer");
    }

    #[test]
    fn test_get_undeclared_input_is_unknown() {
        let ctx = Context::builder("worker").build();
        assert_eq!(
            ctx.get::<String>("api-caller"),
            Err(ResourceError::UnknownName(ManifoldName::from("api-caller")))
        );
    }

    #[test]
    fn test_get_missing_input_is_not_available() {
        let ctx = Context::builder("worker").with_missing("api-caller").build();
        let err = ctx.get::<String>("api-caller").unwrap_err();
        assert_eq!(err, ResourceError::NotAvailable(ManifoldName::from("api-caller")));
        assert!(matches!(WorkerError::from(err), WorkerError::NotYetAvailable));
    }

    #[test]
    fn test_get_wrong_type_is_wrong_shape() {
        let ctx = Context::builder("worker").with_resource("agent", 42_u64).build();
        let err = ctx.get::<String>("agent").unwrap_err();
        assert!(matches!(err, ResourceError::WrongShape { expected, .. } if expected.contains("String")));
        assert!(WorkerError::from(err).is_failure());
    }

    #[test]
    fn test_expired_context_refuses_lookups() {
        let expired = Arc::new(AtomicBool::new(false));
        let ctx = Context::new(
            ManifoldName::from("worker"),
            HashMap::new(),
            expired.clone(),
            CancellationToken::new(),
        );
        expired.store(true, Ordering::Release);
        assert_eq!(
            ctx.require("anything"),
            Err(ResourceError::Expired(ManifoldName::from("worker")))
        );
    }
}
