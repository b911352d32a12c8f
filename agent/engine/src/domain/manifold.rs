// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Manifolds
//!
//! A [`Manifold`] declares a unit of work: the named inputs it depends on, how
//! to start its worker, how to expose that worker to dependents, and
//! optionally how to rewrite the worker's exit error. Manifolds are immutable
//! once handed to the engine.

use crate::domain::context::Context;
use crate::domain::output::OutputFn;
use crate::domain::worker::{Worker, WorkerError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Unique, process-scoped name of a manifold (e.g. "api-caller").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifoldName(String);

impl ManifoldName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ManifoldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ManifoldName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ManifoldName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&ManifoldName> for ManifoldName {
    fn from(name: &ManifoldName) -> Self {
        name.clone()
    }
}

impl std::borrow::Borrow<str> for ManifoldName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Builds a worker from the current values of a manifold's inputs.
pub type StartFn =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Arc<dyn Worker>, WorkerError>> + Send + Sync>;

/// Rewrites a worker's exit error before the engine classifies it.
pub type FilterFn = Arc<dyn Fn(WorkerError) -> WorkerError + Send + Sync>;

/// Installable set of manifolds, keyed by name.
pub type Manifolds = BTreeMap<ManifoldName, Manifold>;

#[derive(Clone)]
pub struct Manifold {
    /// Names of the manifolds whose outputs this one depends on.
    pub inputs: Vec<ManifoldName>,
    pub start: StartFn,
    pub output: Option<OutputFn>,
    pub filter: Option<FilterFn>,
}

impl Manifold {
    /// Create a manifold with no inputs from an async start function.
    pub fn new<F, Fut, W>(start: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<W, WorkerError>> + Send + 'static,
        W: Worker,
    {
        let start: StartFn = Arc::new(move |ctx| {
            let started = start(ctx);
            async move { started.await.map(|worker| Arc::new(worker) as Arc<dyn Worker>) }.boxed()
        });
        Self {
            inputs: Vec::new(),
            start,
            output: None,
            filter: None,
        }
    }

    pub fn with_inputs<I, N>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<ManifoldName>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output(mut self, output: OutputFn) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_filter(mut self, filter: impl Fn(WorkerError) -> WorkerError + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.inputs.iter().any(|input| input.as_str() == name)
    }
}

impl fmt::Debug for Manifold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifold")
            .field("inputs", &self.inputs)
            .field("output", &self.output.is_some())
            .field("filter", &self.filter.is_some())
            .finish()
    }
}
