// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! CPU and GPU slice allocation
//!
//! The allocator knows the node's full CPU and GPU index sets and proposes
//! assignments for new runs. It is deliberately side-effect free: an
//! assignment only becomes real when the state machine commits it into a
//! `RunState`, which keeps the allocator trivially restartable and removes
//! any need to roll back when a later pipeline step fails.
//!
//! Indices are strings throughout because GPU identifiers are not always
//! integers.

use std::collections::{BTreeSet, HashSet};

use crate::core::{Result, WorkerError};

/// Proposes CPU/GPU index assignments out of the node's capacity.
#[derive(Debug, Clone)]
pub struct ResourceAllocator {
    cpuset: BTreeSet<String>,
    gpuset: BTreeSet<String>,
}

impl ResourceAllocator {
    pub fn new(cpuset: BTreeSet<String>, gpuset: BTreeSet<String>) -> Self {
        Self { cpuset, gpuset }
    }

    /// Total CPU count on the node.
    pub fn cpus(&self) -> usize {
        self.cpuset.len()
    }

    /// Total GPU count on the node.
    pub fn gpus(&self) -> usize {
        self.gpuset.len()
    }

    /// Propose a cpuset and gpuset for the requested counts, excluding
    /// indices currently held by running runs.
    ///
    /// Selection is deterministic: the first `k` free indices in the
    /// node sets' stable order. Two calls with the same inputs return the
    /// same proposal.
    pub fn propose(
        &self,
        request_cpus: usize,
        request_gpus: usize,
        used_cpus: &HashSet<String>,
        used_gpus: &HashSet<String>,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let cpuset = propose_set(&self.cpuset, used_cpus, request_cpus, "CPU")?;
        let gpuset = propose_set(&self.gpuset, used_gpus, request_gpus, "GPU")?;
        Ok((cpuset, gpuset))
    }
}

fn propose_set(
    node_set: &BTreeSet<String>,
    used: &HashSet<String>,
    requested: usize,
    resource: &'static str,
) -> Result<BTreeSet<String>> {
    let free: Vec<&String> = node_set.iter().filter(|idx| !used.contains(*idx)).collect();
    if free.len() < requested {
        return Err(WorkerError::InsufficientResources {
            resource,
            requested,
            available: free.len(),
            total: node_set.len(),
        });
    }
    Ok(free.into_iter().take(requested).cloned().collect())
}
