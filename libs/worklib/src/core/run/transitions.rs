// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Run stage transitions
//!
//! `RunStateMachine::transition` advances one run by at most one stage per
//! tick. It is pure with respect to the `RunState` value (the next state is
//! returned, never mutated in place in the registry) but performs external
//! side effects keyed by the run's identity: image and dependency requests,
//! container launch and stop, cache releases, uploads. Repeating a
//! transition that already succeeded is a no-op, which is what makes crash
//! recovery safe: none of the external effects can be rolled back, so all
//! of them must tolerate being asked twice.
//!
//! Error policy per stage:
//! - transient collaborator errors leave the stage unchanged (retried next
//!   tick, logged at debug)
//! - terminal run errors set `failure_message` and route to `CleaningUp`
//! - a kill observed in `Preparing` skips container launch entirely

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::core::allocator::ResourceAllocator;
use crate::core::bundle::normalize_path;
use crate::core::container::{ContainerHandle, ContainerRuntime, ContainerSpec, MountSpec};
use crate::core::delegates::{
    DependencyKey, DependencyManager, DependencyStatus, ImageManager, ImageStatus, UploadBundleFn,
};
use crate::core::network::WorkerNetworks;
use crate::core::run::state::{RunStage, RunState};
use crate::core::system;
use crate::core::WorkerError;

/// Registry-derived inputs for one run's transition.
///
/// The used index sets are computed from the live registry immediately
/// before each run is advanced, so a proposal made late in a tick observes
/// assignments committed (and releases performed) earlier in the same tick.
#[derive(Debug, Default)]
pub struct TickContext {
    pub used_cpus: HashSet<String>,
    pub used_gpus: HashSet<String>,
}

impl TickContext {
    /// Collect the indices currently held by running runs.
    pub fn from_runs<'a>(runs: impl Iterator<Item = &'a RunState>) -> Self {
        let mut ctx = TickContext::default();
        for run in runs.filter(|r| r.stage == RunStage::Running) {
            if let Some(cpuset) = &run.cpuset {
                ctx.used_cpus.extend(cpuset.iter().cloned());
            }
            if let Some(gpuset) = &run.gpuset {
                ctx.used_gpus.extend(gpuset.iter().cloned());
            }
        }
        ctx
    }
}

/// Advances runs through their lifecycle stages.
pub struct RunStateMachine {
    pub(crate) image_manager: Arc<dyn ImageManager>,
    pub(crate) dependency_manager: Arc<dyn DependencyManager>,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) allocator: ResourceAllocator,
    pub(crate) networks: WorkerNetworks,
    pub(crate) upload_bundle_contents: UploadBundleFn,
    pub(crate) shared_file_system: bool,
    pub(crate) container_runtime_name: String,
    pub(crate) stop_grace: Duration,
}

impl RunStateMachine {
    /// Advance `run` by at most one stage.
    pub fn transition(&self, run: RunState, ctx: &TickContext) -> RunState {
        match run.stage {
            RunStage::Preparing => self.transition_from_preparing(run, ctx),
            RunStage::Running => self.transition_from_running(run),
            RunStage::CleaningUp => self.transition_from_cleaning_up(run),
            RunStage::UploadingResults => self.transition_from_uploading_results(run),
            RunStage::Finalizing => self.transition_from_finalizing(run),
            RunStage::Finished => run,
        }
    }

    /// Terminal failure: record the message and route to cleanup.
    fn fail(&self, mut run: RunState, message: String) -> RunState {
        tracing::info!("Run {} failed: {}", run.bundle.uuid, message);
        run.failure_message = Some(message);
        run.stage = RunStage::CleaningUp;
        run.run_status = "Cleaning up".to_string();
        run
    }

    fn transition_from_preparing(&self, mut run: RunState, ctx: &TickContext) -> RunState {
        if run.is_killed {
            // Cancel pending acquisition; CleaningUp releases whatever was
            // already requested.
            run.failure_message = run.kill_message.clone();
            run.stage = RunStage::CleaningUp;
            run.run_status = "Cleaning up".to_string();
            return run;
        }

        if self.shared_file_system && !run.bundle_path.exists() {
            if run.bundle_dir_wait_num_tries == 0 {
                return self.fail(
                    run,
                    "Bundle directory cannot be found on the shared filesystem".to_string(),
                );
            }
            run.bundle_dir_wait_num_tries -= 1;
            run.run_status = "Waiting for the server to create the bundle directory".to_string();
            return run;
        }

        // Request the image and every dependency up front so the caches
        // download them concurrently; readiness is gated afterwards.
        let image_ref = run.resources.docker_image.clone();
        self.image_manager.request(&image_ref);

        let working_dir = PathBuf::from(format!("/{}", run.bundle.uuid));
        let mut mounts = vec![MountSpec {
            source: run.bundle_path.clone(),
            target: working_dir.clone(),
            read_only: false,
        }];
        let mut waiting_on: Option<String> = None;

        if !self.shared_file_system {
            for dep in &run.bundle.dependencies {
                let key = self
                    .dependency_manager
                    .request(&dep.parent_uuid, &dep.parent_path);
                match self.dependency_manager.status(&key) {
                    DependencyStatus::Pending => {
                        if waiting_on.is_none() {
                            waiting_on =
                                Some(format!("Downloading dependency {}", dep.child_path));
                        }
                    }
                    DependencyStatus::Failed { message } => {
                        let fail_message = format!(
                            "Failed to download dependency {}: {}",
                            dep.child_path, message
                        );
                        return self.fail(run, fail_message);
                    }
                    DependencyStatus::Ready { local_path } => {
                        mounts.push(MountSpec {
                            source: local_path,
                            target: working_dir.join(normalize_path(&dep.child_path)),
                            read_only: true,
                        });
                    }
                }
            }
        }

        let digest = match self.image_manager.status(&image_ref) {
            ImageStatus::Pending => {
                run.run_status = format!("Pulling image {}", image_ref);
                return run;
            }
            ImageStatus::Failed { message } => {
                return self.fail(run, format!("Failed to pull image {}: {}", image_ref, message));
            }
            ImageStatus::Ready { digest } => digest,
        };

        if let Some(status) = waiting_on {
            run.run_status = status;
            return run;
        }

        if !self.shared_file_system {
            if let Err(e) = fs::create_dir_all(&run.bundle_path) {
                return self.fail(run, format!("Failed to create bundle directory: {}", e));
            }
        }

        let (cpuset, gpuset) = match self.allocator.propose(
            run.resources.cpus,
            run.resources.gpus,
            &ctx.used_cpus,
            &ctx.used_gpus,
        ) {
            Ok(sets) => sets,
            Err(e) if e.is_impossible_request() => return self.fail(run, e.to_string()),
            Err(e @ WorkerError::InsufficientResources { .. }) => {
                // Capacity is taken right now; wait for another run to free it.
                run.run_status = e.to_string();
                return run;
            }
            Err(e) => {
                tracing::debug!("Resource proposal failed for run {}: {}", run.bundle.uuid, e);
                return run;
            }
        };

        let mut networks = vec![self.networks.internal.clone(), self.networks.general.clone()];
        if run.resources.network {
            networks.push(self.networks.external.clone());
        }

        let spec = ContainerSpec {
            name: format!("worklib_run_{}", run.bundle.uuid),
            image: digest.clone(),
            command: run.resources.command.clone(),
            working_dir,
            mounts,
            networks,
            cpuset: cpuset.clone(),
            gpuset: gpuset.clone(),
            memory_bytes: run.resources.memory_bytes,
            runtime: self.container_runtime_name.clone(),
        };

        let container_id = match self.runtime.create_container(&spec) {
            Ok(id) => id,
            Err(e) => return self.fail(run, format!("Failed to create container: {}", e)),
        };
        run.container_id = Some(container_id.clone());

        if let Err(e) = self.runtime.start(&container_id) {
            return self.fail(run, format!("Failed to start container {}: {}", container_id, e));
        }

        tracing::info!(
            "Started container {} for run {} on cpuset {:?} gpuset {:?}",
            container_id,
            run.bundle.uuid,
            cpuset,
            gpuset
        );

        run.container = Some(ContainerHandle::new(&container_id));
        run.docker_image = Some(digest);
        run.has_contents = true;
        run.container_start_time = Some(SystemTime::now());
        run.cpuset = Some(cpuset);
        run.gpuset = Some(gpuset);
        run.stage = RunStage::Running;
        run.run_status = "Running".to_string();
        run
    }

    fn transition_from_running(&self, mut run: RunState) -> RunState {
        let container_id = match run.container_id.clone() {
            Some(id) => id,
            // Cleared during recovery: the container vanished while we were
            // away.
            None => return self.container_disappeared(run),
        };

        match self.runtime.inspect(&container_id) {
            Ok(stats) => {
                run.container_time_total = stats.cpu_total;
                run.container_time_user = stats.cpu_user;
                run.container_time_system = stats.cpu_system;
                run.max_memory = run.max_memory.max(stats.memory_max_bytes);

                if !stats.running {
                    run.exitcode = stats.exitcode;
                    tracing::info!(
                        "Container for run {} exited with code {:?}",
                        run.bundle.uuid,
                        stats.exitcode
                    );
                    run.stage = RunStage::CleaningUp;
                    run.run_status = "Cleaning up".to_string();
                    return run;
                }
            }
            Err(WorkerError::ContainerNotFound(_)) => return self.container_disappeared(run),
            Err(e) => {
                // Soft: keep previous values, retry next tick.
                tracing::debug!("Stats poll failed for run {}: {}", run.bundle.uuid, e);
            }
        }

        match system::path_size_bytes(&run.bundle_path) {
            Ok(bytes) => run.disk_utilization = bytes,
            Err(e) => {
                tracing::debug!("Disk usage check failed for run {}: {}", run.bundle.uuid, e);
            }
        }

        if !run.is_killed
            && run.resources.disk_bytes > 0
            && run.disk_utilization > run.resources.disk_bytes
        {
            tracing::info!(
                "Run {} exceeded its disk quota ({} > {} bytes)",
                run.bundle.uuid,
                run.disk_utilization,
                run.resources.disk_bytes
            );
            run.kill_message = Some("Disk limit exceeded".to_string());
            run.is_killed = true;
        }

        if run.is_killed {
            match self.runtime.stop(&container_id, self.stop_grace) {
                Ok(code) => {
                    tracing::debug!("Stopped container {} (exit code {:?})", container_id, code);
                }
                Err(WorkerError::ContainerNotFound(_)) => {}
                Err(e) => tracing::debug!("Failed to stop container {}: {}", container_id, e),
            }
            // The exit is picked up by inspect on the next tick.
        }

        run
    }

    fn container_disappeared(&self, mut run: RunState) -> RunState {
        tracing::info!("Container for run {} disappeared", run.bundle.uuid);
        run.exitcode = None;
        run.failure_message = Some("container disappeared".to_string());
        run.container = None;
        run.stage = RunStage::CleaningUp;
        run.run_status = "Cleaning up".to_string();
        run
    }

    fn transition_from_cleaning_up(&self, mut run: RunState) -> RunState {
        if !self.shared_file_system {
            for dep in &run.bundle.dependencies {
                self.dependency_manager.release(&DependencyKey {
                    parent_uuid: dep.parent_uuid.clone(),
                    parent_path: dep.parent_path.clone(),
                });
            }
        }

        // Final disk accounting, best effort.
        if let Ok(bytes) = system::path_size_bytes(&run.bundle_path) {
            run.disk_utilization = bytes;
        }

        if run.is_killed && run.failure_message.is_none() {
            run.failure_message = run.kill_message.clone();
        }

        if run.has_contents && !self.shared_file_system {
            run.stage = RunStage::UploadingResults;
            run.run_status = "Uploading results".to_string();
        } else {
            // Nothing to upload (no container ever started, or the server
            // reads the shared directory directly).
            run.finished = true;
            run.stage = RunStage::Finalizing;
            run.run_status = "Finalizing".to_string();
        }
        run
    }

    fn transition_from_uploading_results(&self, mut run: RunState) -> RunState {
        match (self.upload_bundle_contents)(&run.bundle.uuid) {
            Ok(()) => {
                tracing::debug!("Uploaded contents for run {}", run.bundle.uuid);
            }
            Err(e) => {
                tracing::warn!("Failed to upload contents for run {}: {}", run.bundle.uuid, e);
                if run.failure_message.is_none() {
                    run.failure_message = Some(format!("Upload failed: {}", e));
                }
            }
        }
        run.finished = true;
        run.stage = RunStage::Finalizing;
        run.run_status = "Finalizing".to_string();
        run
    }

    fn transition_from_finalizing(&self, mut run: RunState) -> RunState {
        if run.finalized {
            run.stage = RunStage::Finished;
            run.run_status = "Finished".to_string();
        }
        run
    }
}
