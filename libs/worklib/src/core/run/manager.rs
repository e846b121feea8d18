// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Run registry and tick processing
//!
//! `RunManager` owns the map of active runs and is the only component that
//! mutates it. One non-reentrant lock serializes everything: the ticking
//! task holds it for a full `process_runs` pass, and user-initiated
//! operations (create, kill, queries, I/O) take it briefly from their own
//! threads. Inner helpers never re-lock; the lock is taken once at each
//! public-operation boundary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::bundle::{BundleInfo, RunResources};
use crate::core::committer::JsonStateCommitter;
use crate::core::config::RunManagerConfig;
use crate::core::container::ContainerRuntime;
use crate::core::delegates::{DependencyKey, DependencyManager, ImageManager, Reader};
use crate::core::network::WorkerNetworks;
use crate::core::run::state::{RunStage, RunState, WorkerRun};
use crate::core::run::transitions::{RunStateMachine, TickContext};
use crate::core::system;
use crate::core::{Result, WorkerError};

/// Executes dispatched bundles on this host, each in its own container.
///
/// Construction goes through [`RunManagerBuilder`](super::RunManagerBuilder),
/// which provisions the worker networks and the run directory root.
pub struct RunManager {
    pub(crate) config: RunManagerConfig,
    pub(crate) runs: Mutex<HashMap<String, RunState>>,
    pub(crate) stopping: AtomicBool,
    pub(crate) machine: RunStateMachine,
    pub(crate) committer: JsonStateCommitter,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) image_manager: Arc<dyn ImageManager>,
    pub(crate) dependency_manager: Arc<dyn DependencyManager>,
    pub(crate) reader: Arc<dyn Reader>,
    pub(crate) networks: WorkerNetworks,
    /// Root for run working directories; `None` in shared-filesystem mode.
    pub(crate) bundles_dir: Option<PathBuf>,
}

impl RunManager {
    /// Register a newly dispatched bundle and start processing it.
    ///
    /// Refused while the manager is stopping. Dispatching a UUID that is
    /// already registered is refused too (the server retrying a dispatch it
    /// already made), leaving the existing run untouched.
    pub fn create_run(&self, bundle: BundleInfo, resources: RunResources) {
        if self.stopping.load(Ordering::SeqCst) {
            tracing::info!("Run manager stopping, refusing run {}", bundle.uuid);
            return;
        }

        let bundle_path = if self.config.shared_file_system {
            match &bundle.location {
                Some(location) => location.clone(),
                None => {
                    tracing::warn!(
                        "Run {} has no server-assigned location on a shared filesystem worker",
                        bundle.uuid
                    );
                    return;
                }
            }
        } else {
            match &self.bundles_dir {
                Some(dir) => dir.join(&bundle.uuid),
                None => {
                    tracing::warn!("Run directory root missing, refusing run {}", bundle.uuid);
                    return;
                }
            }
        };

        let state = RunState::new(
            bundle,
            bundle_path,
            resources,
            self.config.bundle_dir_wait_num_tries,
        );

        let mut runs = self.runs.lock();
        if runs.contains_key(&state.bundle.uuid) {
            tracing::warn!(
                "Run {} already registered, ignoring duplicate dispatch",
                state.bundle.uuid
            );
            return;
        }
        tracing::info!("Registered run {}", state.bundle.uuid);
        runs.insert(state.bundle.uuid.clone(), state);
    }

    /// One tick: advance every run one transition, then sweep.
    ///
    /// The sweep force-removes containers still held by runs past
    /// finalization and drops finished runs from the registry.
    pub fn process_runs(&self) {
        let mut runs = self.runs.lock();

        // Snapshot the keys: transitions replace entries but must not
        // invalidate the iteration. Sorted so ties (two runs waiting on the
        // same free cores) resolve the same way every tick.
        let mut uuids: Vec<String> = runs.keys().cloned().collect();
        uuids.sort();
        for uuid in uuids {
            let Some(current) = runs.get(&uuid).cloned() else {
                continue;
            };
            let ctx = TickContext::from_runs(runs.values());
            let next = self.machine.transition(current, &ctx);
            runs.insert(uuid, next);
        }

        for run in runs.values_mut() {
            let held_past_finalizing = run.stage >= RunStage::Finalizing;
            if !held_past_finalizing {
                continue;
            }
            if let Some(container_id) = run.container_id.clone() {
                match self.runtime.remove(&container_id, true) {
                    Ok(()) | Err(WorkerError::ContainerNotFound(_)) => {
                        run.container = None;
                    }
                    Err(e) => {
                        tracing::debug!("Failed to remove container {}: {}", container_id, e);
                    }
                }
            }
        }

        runs.retain(|_, run| run.stage != RunStage::Finished);
    }

    /// Ask for a run to be killed. Advisory: the flag is observed by the
    /// state machine on its next visit; this call never waits.
    pub fn kill(&self, uuid: &str) {
        let mut runs = self.runs.lock();
        match runs.get_mut(uuid) {
            Some(run) => {
                run.kill_message = Some("Kill requested".to_string());
                run.is_killed = true;
            }
            // Benign race with the run finishing on its own.
            None => tracing::debug!("Kill requested for unknown run {}", uuid),
        }
    }

    /// Record that the server acknowledged the run's terminal state.
    /// Unknown UUIDs are silently ignored.
    pub fn mark_finalized(&self, uuid: &str) {
        let mut runs = self.runs.lock();
        if let Some(run) = runs.get_mut(uuid) {
            run.finalized = true;
        }
    }

    /// Whether a run with this UUID is currently registered.
    pub fn has_run(&self, uuid: &str) -> bool {
        self.runs.lock().contains_key(uuid)
    }

    /// Server-facing report for every registered run.
    pub fn all_runs(&self) -> Vec<WorkerRun> {
        let runs = self.runs.lock();
        runs.values()
            .map(|run| run.to_worker_run(&self.config.worker_id))
            .collect()
    }

    /// All dependencies currently cached on this worker. Empty on a shared
    /// filesystem, where the cache does not apply.
    pub fn all_dependencies(&self) -> Vec<DependencyKey> {
        if self.config.shared_file_system {
            return Vec::new();
        }
        self.dependency_manager.all_dependencies()
    }

    /// Total number of CPUs this worker hands out.
    pub fn cpus(&self) -> usize {
        self.machine.allocator.cpus()
    }

    /// Total number of GPUs this worker hands out.
    pub fn gpus(&self) -> usize {
        self.machine.allocator.gpus()
    }

    /// Total installed memory of this host in bytes.
    pub fn memory_bytes(&self) -> u64 {
        system::total_memory_bytes()
    }

    /// Free disk space under the work directory, or `None` when unknown.
    pub fn free_disk_bytes(&self) -> Option<u64> {
        system::free_disk_bytes(&self.config.work_dir)
    }

    /// Snapshot the registry to disk. Live container handles are elided by
    /// the serializer; everything else round-trips.
    pub fn save_state(&self) -> Result<()> {
        let snapshot = self.runs.lock().clone();
        self.committer.commit(&snapshot)
    }

    /// Restore the registry from disk, re-acquiring live container handles
    /// from the runtime. A container the runtime no longer knows clears the
    /// run's `container_id`, so later transitions treat it as already gone.
    pub fn load_state(&self) -> Result<()> {
        let mut loaded: HashMap<String, RunState> = self.committer.load()?;

        for (uuid, run) in loaded.iter_mut() {
            let Some(container_id) = run.container_id.clone() else {
                continue;
            };
            match self.runtime.lookup(&container_id) {
                Ok(Some(handle)) => {
                    run.container = Some(handle);
                }
                Ok(None) => {
                    tracing::debug!(
                        "Container {} for run {} is gone, clearing",
                        container_id,
                        uuid
                    );
                    run.container_id = None;
                }
                Err(e) => {
                    tracing::debug!("Error getting the container for run {}: {}", uuid, e);
                    run.container_id = None;
                }
            }
        }

        let count = loaded.len();
        let mut runs = self.runs.lock();
        runs.extend(loaded);
        if count > 0 {
            tracing::info!("Restored {} run(s) from snapshot", count);
        }
        Ok(())
    }
}
