// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Install-Time Graph Validation
//!
//! The engine only ever holds an acyclic graph whose edges point at installed
//! manifolds. Every structural problem is caught here, before anything is
//! installed, and reported as an [`EngineError`].

use crate::domain::config::EngineError;
use crate::domain::manifold::{Manifold, ManifoldName, Manifolds};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Check a single manifold's declared inputs in isolation.
pub fn validate_inputs(name: &ManifoldName, manifold: &Manifold) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidName(name.clone()));
    }
    let mut seen = HashSet::new();
    for input in &manifold.inputs {
        if input == name {
            return Err(EngineError::CycleDetected(vec![name.clone()]));
        }
        if !seen.insert(input) {
            return Err(EngineError::DuplicateInput {
                manifold: name.clone(),
                input: input.clone(),
            });
        }
    }
    Ok(())
}

/// Order a batch of manifolds so that every manifold follows its inputs.
///
/// Inputs may refer to `installed` names or to other members of `batch`.
/// Ties are broken by name so the order is deterministic.
pub fn install_order(
    installed: &HashSet<ManifoldName>,
    batch: &Manifolds,
) -> Result<Vec<ManifoldName>, EngineError> {
    for (name, manifold) in batch {
        if installed.contains(name) {
            return Err(EngineError::AlreadyInstalled(name.clone()));
        }
        validate_inputs(name, manifold)?;
        for input in &manifold.inputs {
            if !installed.contains(input) && !batch.contains_key(input) {
                return Err(EngineError::UnknownInput {
                    manifold: name.clone(),
                    input: input.clone(),
                });
            }
        }
    }

    topological_order(&batch.iter().collect())
}

/// Fail with [`EngineError::CycleDetected`] if `graph` contains a cycle.
///
/// Inputs naming nothing in `graph` are ignored. A manifold reinstalled under
/// a name that older manifolds still list as an input can close a loop that
/// [`install_order`] cannot see on its own.
pub fn check_acyclic<'a>(
    graph: impl Iterator<Item = (&'a ManifoldName, &'a Manifold)>,
) -> Result<(), EngineError> {
    topological_order(&graph.collect()).map(|_| ())
}

// Kahn's algorithm over the edges that stay inside `graph`.
fn topological_order(graph: &BTreeMap<&ManifoldName, &Manifold>) -> Result<Vec<ManifoldName>, EngineError> {
    let mut pending: BTreeMap<&ManifoldName, usize> = graph
        .iter()
        .map(|(name, manifold)| {
            let internal = manifold.inputs.iter().filter(|input| graph.contains_key(*input)).count();
            (*name, internal)
        })
        .collect();
    let mut ready: BTreeSet<&ManifoldName> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(next) = ready.pop_first() {
        pending.remove(next);
        order.push(next.clone());
        for (name, manifold) in graph {
            if manifold.depends_on(next.as_str()) {
                if let Some(count) = pending.get_mut(*name) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*name);
                    }
                }
            }
        }
    }

    if !pending.is_empty() {
        let cycle = pending.keys().map(|name| (*name).clone()).collect();
        return Err(EngineError::CycleDetected(cycle));
    }
    Ok(order)
}

/// Every manifold that depends on `name`, directly or transitively.
pub fn transitive_dependents<'a>(
    name: &ManifoldName,
    graph: impl Iterator<Item = (&'a ManifoldName, &'a Manifold)> + Clone,
) -> BTreeSet<ManifoldName> {
    let mut found = BTreeSet::new();
    let mut frontier = vec![name.clone()];
    while let Some(current) = frontier.pop() {
        for (candidate, manifold) in graph.clone() {
            if manifold.depends_on(current.as_str()) && found.insert(candidate.clone()) {
                frontier.push(candidate.clone());
            }
        }
    }
    found
}
