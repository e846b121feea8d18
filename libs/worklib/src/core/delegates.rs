// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Collaborator delegate traits
//!
//! The image cache, dependency cache, reader helper, and upload path are
//! external subsystems with their own background workers. The core drives
//! them through these seams and only ever observes readiness, so delegate
//! calls must return promptly.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::WorkerError;
use crate::core::run::RunState;

/// Readiness of a requested container image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    /// Pull in progress.
    Pending,
    /// Image available locally under `digest`.
    Ready { digest: String },
    /// Pull failed for good.
    Failed { message: String },
}

/// Manages the local image cache.
pub trait ImageManager: Send + Sync {
    fn start(&self);
    fn stop(&self);

    /// Ask for `image_ref` to be made available locally. Idempotent; also
    /// refreshes the image's last-used time.
    fn request(&self, image_ref: &str);

    /// Current readiness of `image_ref`.
    fn status(&self, image_ref: &str) -> ImageStatus;
}

/// Identifies one cached dependency: a path inside a parent bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyKey {
    pub parent_uuid: String,
    pub parent_path: String,
}

/// Readiness of a requested dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    /// Download in progress.
    Pending,
    /// Dependency materialized at `local_path` on this worker.
    Ready { local_path: PathBuf },
    /// Download failed for good.
    Failed { message: String },
}

/// Manages the local dependency cache with reference counting.
pub trait DependencyManager: Send + Sync {
    fn start(&self);
    fn stop(&self);

    /// Ask for the dependency to be downloaded and take a reference on it.
    /// Idempotent per run.
    fn request(&self, parent_uuid: &str, parent_path: &str) -> DependencyKey;

    /// Current readiness of a requested dependency.
    fn status(&self, key: &DependencyKey) -> DependencyStatus;

    /// Drop a reference taken by [`DependencyManager::request`].
    fn release(&self, key: &DependencyKey);

    /// All dependencies currently held in the cache.
    fn all_dependencies(&self) -> Vec<DependencyKey>;
}

/// Response headers passed to a [`ReplyFn`].
pub type ReplyHeaders = HashMap<String, String>;

/// One-shot reply callback used by the streaming I/O operations.
///
/// The outer transport supplies it and the core (or the reader delegate)
/// calls it exactly once with `(error, headers, body)`.
pub type ReplyFn = Box<dyn FnOnce(Option<WorkerError>, ReplyHeaders, Vec<u8>) + Send>;

/// Serves file contents out of a run's working directory.
pub trait Reader: Send + Sync {
    /// Run the read described by `path`/`args` against `run_state` and
    /// deliver the result through `reply`.
    fn read(&self, run_state: &RunState, path: &str, args: &HashMap<String, String>, reply: ReplyFn);
}

/// Callback uploading a finished bundle's contents back to the server.
pub type UploadBundleFn = Box<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;
