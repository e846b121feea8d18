// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Container runtime driver contract
//!
//! The core never talks to a container engine directly; it goes through
//! this trait. Drivers own their own client state and thread safety. The
//! core treats "container not found" as a first-class observation
//! ([`WorkerError::ContainerNotFound`]), never as something to roll back.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::Result;

/// A bind mount into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Host path.
    pub source: PathBuf,
    /// Path inside the container.
    pub target: PathBuf,
    pub read_only: bool,
}

/// Everything the driver needs to create one run container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name, derived from the run UUID.
    pub name: String,
    /// Image reference or digest to run.
    pub image: String,
    /// Command executed inside the container.
    pub command: String,
    /// Working directory inside the container.
    pub working_dir: PathBuf,
    /// Bind mounts (bundle directory plus read-only dependencies).
    pub mounts: Vec<MountSpec>,
    /// Names of the networks the container joins.
    pub networks: Vec<String>,
    /// CPU indices the container is pinned to.
    pub cpuset: BTreeSet<String>,
    /// GPU indices exposed to the container.
    pub gpuset: BTreeSet<String>,
    /// Memory limit in bytes.
    pub memory_bytes: u64,
    /// Runtime name (e.g. "runc", "nvidia").
    pub runtime: String,
}

/// Point-in-time view of a container, as reported by the driver.
#[derive(Debug, Clone, Default)]
pub struct ContainerStats {
    /// Whether the container process is still running.
    pub running: bool,
    /// Exit code once the container has terminated, when known.
    pub exitcode: Option<i64>,
    /// Cumulative CPU time, all modes.
    pub cpu_total: Duration,
    /// Cumulative user-mode CPU time.
    pub cpu_user: Duration,
    /// Cumulative kernel-mode CPU time.
    pub cpu_system: Duration,
    /// Peak memory usage in bytes.
    pub memory_max_bytes: u64,
}

/// Live handle to a container the driver has confirmed to exist.
///
/// Handles are cheap tokens, not connections: holding one does not keep the
/// container alive, it only records that the id was valid when the driver
/// last looked. Handles are never persisted; on restart they are re-acquired
/// through [`ContainerRuntime::lookup`].
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    id: Arc<str>,
}

impl ContainerHandle {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: Arc::from(id.as_ref()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Driver interface for the local container engine.
///
/// All methods may be called with the run-registry lock held, so they must
/// be non-blocking or boundedly blocking. Long operations (image pulls,
/// graceful stops) are the driver's problem to background; the core only
/// observes their outcomes on later ticks.
pub trait ContainerRuntime: Send + Sync {
    /// Create a container from `spec` without starting it. Returns the
    /// container id.
    fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container.
    fn start(&self, id: &str) -> Result<()>;

    /// Stop a running container, waiting up to `grace` before the driver
    /// escalates from SIGTERM to SIGKILL. Returns the exit code when the
    /// driver observed one.
    fn stop(&self, id: &str, grace: Duration) -> Result<Option<i64>>;

    /// Inspect status and resource statistics.
    fn inspect(&self, id: &str) -> Result<ContainerStats>;

    /// Resolve the container's address on the named network.
    fn ip_on_network(&self, network: &str, id: &str) -> Result<IpAddr>;

    /// Remove a container. With `force`, a running container is killed
    /// first.
    fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Look up a container by id, returning a live handle when it exists.
    fn lookup(&self, id: &str) -> Result<Option<ContainerHandle>>;

    /// Create a named network. `internal` networks are isolated from the
    /// host's external network.
    fn network_create(&self, name: &str, internal: bool) -> Result<String>;

    /// Find an existing network by name.
    fn network_lookup(&self, name: &str) -> Result<Option<String>>;

    /// Remove a network by name.
    fn network_remove(&self, name: &str) -> Result<()>;
}
