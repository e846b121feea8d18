// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! worklib - local run execution for worker nodes
//!
//! A worker node in a distributed job-execution cluster accepts bundles
//! (self-describing compute jobs) from a central server and executes each
//! one in its own container on the local host. This crate is the node's
//! run lifecycle engine: the per-run state machine, CPU/GPU slice
//! allocation, crash-safe registry persistence, container network
//! provisioning, server↔container I/O brokering, and the bounded-time
//! shutdown protocol.
//!
//! The container engine, image cache, dependency cache, reader helper, and
//! the outer worker loop that polls the server are collaborators injected
//! through the traits in [`core::container`] and [`core::delegates`].
//!
//! # Example
//!
//! ```ignore
//! use worklib::core::{RunManagerBuilder, RunManagerConfig};
//!
//! let config = RunManagerConfig::new("worker-1", "/var/lib/worklib", "/var/lib/worklib/state.json")
//!     .with_cpuset(["0", "1", "2", "3"]);
//!
//! let manager = RunManagerBuilder::new(config)
//!     .with_runtime(runtime)
//!     .with_image_manager(images)
//!     .with_dependency_manager(dependencies)
//!     .with_reader(reader)
//!     .with_upload_bundle_contents(|uuid| upload(uuid))
//!     .build()?;
//!
//! manager.start()?;
//! loop {
//!     // dispatch new bundles with manager.create_run(..)
//!     manager.process_runs();
//! }
//! ```

pub mod core;

pub use crate::core::{
    BundleInfo, ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStats,
    DependencyKey, DependencyManager, DependencyStatus, DependencySpec, ImageManager,
    ImageStatus, JsonStateCommitter, MountSpec, Reader, ReplyFn, ReplyHeaders, ResourceAllocator,
    Result, RunManager, RunManagerBuilder, RunManagerConfig, RunResources, RunStage, RunState,
    UploadBundleFn, WorkerError, WorkerNetworks, WorkerRun,
};
