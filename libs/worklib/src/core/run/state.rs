// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Run state machine types
//!
//! This module defines the per-run lifecycle records:
//! - `RunStage` - discrete phase of a run's lifecycle, strictly advancing
//! - `RunState` - the authoritative record of everything the core knows
//!   about one run
//! - `WorkerRun` - the projection reported back to the server
//!
//! # Stage Transitions
//!
//! ```text
//! ┌───────────┐
//! │ Preparing │ image + dependencies + resources + container launch
//! └─────┬─────┘
//!       ▼
//! ┌───────────┐
//! │  Running  │ poll status/stats, honor kills
//! └─────┬─────┘
//!       ▼
//! ┌────────────┐
//! │ CleaningUp │ release dependency references
//! └─────┬──────┘
//!       ├──────────────────────┐ shared FS / nothing to upload
//!       ▼                      │
//! ┌──────────────────┐         │
//! │ UploadingResults │         │
//! └─────┬────────────┘         │
//!       ▼                      ▼
//! ┌────────────┐      ┌──────────┐
//! │ Finalizing │─────►│ Finished │ purged on the next tick
//! └────────────┘      └──────────┘
//! ```
//!
//! A kill never moves the stage by itself; it raises `is_killed` and the
//! state machine routes the run forward on its next visit.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::bundle::{BundleInfo, RunResources};
use crate::core::container::ContainerHandle;

/// Discrete phase of a run's lifecycle. Ordered: a run's stage only ever
/// advances.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Acquiring image and dependencies, waiting on resources, launching
    /// the container.
    Preparing,
    /// Container is (believed to be) running.
    Running,
    /// Releasing dependency references after the container exited.
    CleaningUp,
    /// Uploading the bundle contents back to the server.
    UploadingResults,
    /// Waiting for the server to acknowledge the terminal state.
    Finalizing,
    /// Terminal; the registry drops the run on the next tick.
    Finished,
}

impl RunStage {
    /// The state name reported to the server for this stage.
    pub fn server_state(&self) -> &'static str {
        match self {
            RunStage::Preparing => "preparing",
            RunStage::Running => "running",
            RunStage::CleaningUp => "cleaning_up",
            RunStage::UploadingResults => "uploading_results",
            RunStage::Finalizing => "finalizing",
            RunStage::Finished => "ready",
        }
    }

    /// True once the container is gone and only bookkeeping remains.
    pub fn is_past_execution(&self) -> bool {
        *self >= RunStage::CleaningUp
    }
}

/// The authoritative record of one run on this worker.
///
/// Treated as an immutable value replaced atomically in the registry on
/// each change: every tick reasons about a single snapshot and readers
/// never observe a half-updated record. The live container handle is the
/// one non-serialisable field; it is re-acquired from the runtime after a
/// restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub stage: RunStage,

    /// Free-form human description of what the run is doing right now.
    pub run_status: String,

    pub bundle: BundleInfo,

    /// Canonicalised host path of the run's working directory.
    pub bundle_path: PathBuf,

    /// Shared-filesystem only: remaining ticks to wait for the server to
    /// provision `bundle_path`.
    pub bundle_dir_wait_num_tries: u32,

    pub resources: RunResources,

    pub bundle_start_time: SystemTime,
    pub container_start_time: Option<SystemTime>,
    pub container_time_total: Duration,
    pub container_time_user: Duration,
    pub container_time_system: Duration,

    /// Stable container id, once a container has been created. May dangle
    /// after the container is removed.
    pub container_id: Option<String>,

    /// Live handle; never persisted, re-acquired on load.
    #[serde(skip)]
    pub container: Option<ContainerHandle>,

    /// Image digest the container was started from.
    pub docker_image: Option<String>,

    pub is_killed: bool,

    /// Set once a container has started: the working directory has
    /// contents worth uploading.
    pub has_contents: bool,

    /// CPU indices held while Running.
    pub cpuset: Option<BTreeSet<String>>,

    /// GPU indices held while Running.
    pub gpuset: Option<BTreeSet<String>>,

    /// Peak memory observed, bytes.
    pub max_memory: u64,

    /// Last observed size of the working directory, bytes.
    pub disk_utilization: u64,

    pub exitcode: Option<i64>,
    pub failure_message: Option<String>,
    pub kill_message: Option<String>,

    /// Container is gone and results (if any) are uploaded.
    pub finished: bool,

    /// Server acknowledged the terminal state; the run may be purged.
    pub finalized: bool,
}

impl RunState {
    /// Fresh record for a newly dispatched bundle.
    pub fn new(
        bundle: BundleInfo,
        bundle_path: PathBuf,
        resources: RunResources,
        bundle_dir_wait_num_tries: u32,
    ) -> Self {
        Self {
            stage: RunStage::Preparing,
            run_status: String::new(),
            bundle,
            bundle_path,
            bundle_dir_wait_num_tries,
            resources,
            bundle_start_time: SystemTime::now(),
            container_start_time: None,
            container_time_total: Duration::ZERO,
            container_time_user: Duration::ZERO,
            container_time_system: Duration::ZERO,
            container_id: None,
            container: None,
            docker_image: None,
            is_killed: false,
            has_contents: false,
            cpuset: None,
            gpuset: None,
            max_memory: 0,
            disk_utilization: 0,
            exitcode: None,
            failure_message: None,
            kill_message: None,
            finished: false,
            finalized: false,
        }
    }

    /// Project this record into the server-facing report.
    pub fn to_worker_run(&self, worker_id: &str) -> WorkerRun {
        WorkerRun {
            uuid: self.bundle.uuid.clone(),
            run_status: self.run_status.clone(),
            bundle_start_time: self.bundle_start_time,
            container_start_time: self.container_start_time,
            container_time_total: self.container_time_total,
            container_time_user: self.container_time_user,
            container_time_system: self.container_time_system,
            docker_image: self.docker_image.clone(),
            state: self.stage.server_state().to_string(),
            remote: worker_id.to_string(),
            exitcode: self.exitcode,
            failure_message: self.failure_message.clone(),
        }
    }
}

/// Per-run report sent to the server on every poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRun {
    pub uuid: String,
    pub run_status: String,
    pub bundle_start_time: SystemTime,
    pub container_start_time: Option<SystemTime>,
    pub container_time_total: Duration,
    pub container_time_user: Duration,
    pub container_time_system: Duration,
    pub docker_image: Option<String>,
    pub state: String,
    pub remote: String,
    pub exitcode: Option<i64>,
    pub failure_message: Option<String>,
}
