// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Run manager configuration
//!
//! All tunables for the run manager live here. Defaults match what the
//! production workers deploy with; tests shrink the timeouts.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Directory name under `work_dir` where run working directories are created.
pub const BUNDLES_DIR_NAME: &str = "runs";

/// Network buffer size to use while proxying with netcat.
pub const NETCAT_BUFFER_SIZE: usize = 4096;

/// Seconds to wait for run kills to propagate before giving up on them.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(100);

/// Grace period handed to the container runtime when stopping a container.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Ticks to wait for the server to provision a run directory on shared
/// filesystem workers before declaring the run failed.
pub const BUNDLE_DIR_WAIT_NUM_TRIES: u32 = 120;

/// Default prefix for the three worker container networks.
pub const DEFAULT_NETWORK_PREFIX: &str = "worklib_worker_network";

/// Configuration for a [`RunManager`](crate::core::run::RunManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManagerConfig {
    /// Worker identifier reported back to the server with every run.
    pub worker_id: String,

    /// Root of this worker's scratch space. Run directories are created
    /// under `<work_dir>/runs/<uuid>` unless `shared_file_system` is set.
    pub work_dir: PathBuf,

    /// Path of the snapshot file the registry is committed to.
    pub commit_file: PathBuf,

    /// CPU core indices this worker may hand out, as strings.
    pub cpuset: BTreeSet<String>,

    /// GPU device indices this worker may hand out, as strings.
    /// Strings because GPU identifiers are not always integers.
    pub gpuset: BTreeSet<String>,

    /// When set, run directories are provisioned by the server on a
    /// filesystem shared with this worker and the local dependency cache
    /// is disabled.
    pub shared_file_system: bool,

    /// Container runtime name passed through to the driver (e.g. "runc",
    /// "nvidia").
    pub container_runtime_name: String,

    /// Prefix for the three worker container networks.
    pub network_prefix: String,

    /// How long `kill_all` waits for killed runs to drain, sweeping once
    /// per second.
    pub kill_timeout: Duration,

    /// Grace period for container stop (term, then kill).
    pub stop_grace: Duration,

    /// Shared-filesystem only: ticks to wait for the server to create the
    /// run directory.
    pub bundle_dir_wait_num_tries: u32,
}

impl RunManagerConfig {
    /// Create a config with production defaults for the given identity and
    /// paths.
    pub fn new(
        worker_id: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        commit_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            work_dir: work_dir.into(),
            commit_file: commit_file.into(),
            cpuset: BTreeSet::new(),
            gpuset: BTreeSet::new(),
            shared_file_system: false,
            container_runtime_name: "runc".to_string(),
            network_prefix: DEFAULT_NETWORK_PREFIX.to_string(),
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            bundle_dir_wait_num_tries: BUNDLE_DIR_WAIT_NUM_TRIES,
        }
    }

    /// Set the CPU indices this worker owns.
    pub fn with_cpuset<I, S>(mut self, cpus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cpuset = cpus.into_iter().map(Into::into).collect();
        self
    }

    /// Set the GPU indices this worker owns.
    pub fn with_gpuset<I, S>(mut self, gpus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gpuset = gpus.into_iter().map(Into::into).collect();
        self
    }

    /// Enable shared-filesystem mode.
    pub fn with_shared_file_system(mut self, shared: bool) -> Self {
        self.shared_file_system = shared;
        self
    }

    /// Set the container runtime name.
    pub fn with_container_runtime_name(mut self, name: impl Into<String>) -> Self {
        self.container_runtime_name = name.into();
        self
    }

    /// Set the network prefix.
    pub fn with_network_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.network_prefix = prefix.into();
        self
    }

    /// Set the kill-all drain timeout.
    pub fn with_kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Set the container stop grace period.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}
