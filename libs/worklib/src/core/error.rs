// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Error types for worklib
//!
//! Defines the core error types used throughout worklib.
//! Collaborator drivers (container runtime, image cache) can extend these
//! with their own error types through the `Other` passthrough.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error(
        "Requested more {resource}s ({requested}) than available \
         ({available} currently out of {total} on the machine)"
    )]
    InsufficientResources {
        resource: &'static str,
        requested: usize,
        available: usize,
        total: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("State snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkerError {
    /// True when the allocator reported a request that can never be satisfied
    /// on this node, as opposed to one that is merely waiting on capacity.
    pub fn is_impossible_request(&self) -> bool {
        matches!(
            self,
            WorkerError::InsufficientResources { requested, total, .. } if requested > total
        )
    }
}

/// Result type that uses WorkerError
pub type Result<T> = std::result::Result<T, WorkerError>;
