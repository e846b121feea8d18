// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Builder pattern for RunManager configuration.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;

use crate::core::allocator::ResourceAllocator;
use crate::core::committer::JsonStateCommitter;
use crate::core::config::{self, RunManagerConfig};
use crate::core::container::ContainerRuntime;
use crate::core::delegates::{DependencyManager, ImageManager, Reader, UploadBundleFn};
use crate::core::network::WorkerNetworks;
use crate::core::run::manager::RunManager;
use crate::core::run::transitions::RunStateMachine;
use crate::core::{Result, WorkerError};

/// Builder for configuring and constructing a [`RunManager`].
///
/// All collaborators are required; `build` fails on a missing one rather
/// than substituting a stub, because every collaborator is load-bearing in
/// production.
pub struct RunManagerBuilder {
    config: RunManagerConfig,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    image_manager: Option<Arc<dyn ImageManager>>,
    dependency_manager: Option<Arc<dyn DependencyManager>>,
    reader: Option<Arc<dyn Reader>>,
    upload_bundle_contents: Option<UploadBundleFn>,
}

impl RunManagerBuilder {
    pub fn new(config: RunManagerConfig) -> Self {
        Self {
            config,
            runtime: None,
            image_manager: None,
            dependency_manager: None,
            reader: None,
            upload_bundle_contents: None,
        }
    }

    /// Set the container runtime driver.
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the image cache manager.
    pub fn with_image_manager(mut self, image_manager: Arc<dyn ImageManager>) -> Self {
        self.image_manager = Some(image_manager);
        self
    }

    /// Set the dependency cache manager.
    pub fn with_dependency_manager(
        mut self,
        dependency_manager: Arc<dyn DependencyManager>,
    ) -> Self {
        self.dependency_manager = Some(dependency_manager);
        self
    }

    /// Set the reader helper that serves file contents out of runs.
    pub fn with_reader(mut self, reader: Arc<dyn Reader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Set the callback that uploads a finished bundle's contents.
    pub fn with_upload_bundle_contents<F>(mut self, upload: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.upload_bundle_contents = Some(Box::new(upload));
        self
    }

    /// Provision the worker networks and run directory root, then assemble
    /// the manager.
    pub fn build(self) -> Result<RunManager> {
        let config = self.config;
        let runtime = self
            .runtime
            .ok_or_else(|| missing("container runtime"))?;
        let image_manager = self
            .image_manager
            .ok_or_else(|| missing("image manager"))?;
        let dependency_manager = self
            .dependency_manager
            .ok_or_else(|| missing("dependency manager"))?;
        let reader = self.reader.ok_or_else(|| missing("reader"))?;
        let upload_bundle_contents = self
            .upload_bundle_contents
            .ok_or_else(|| missing("upload callback"))?;

        let bundles_dir = if config.shared_file_system {
            None
        } else {
            Some(prepare_bundles_dir(&config.work_dir)?)
        };

        let networks = WorkerNetworks::provision(&config.network_prefix, runtime.as_ref())?;

        let machine = RunStateMachine {
            image_manager: Arc::clone(&image_manager),
            dependency_manager: Arc::clone(&dependency_manager),
            runtime: Arc::clone(&runtime),
            allocator: ResourceAllocator::new(config.cpuset.clone(), config.gpuset.clone()),
            networks: networks.clone(),
            upload_bundle_contents,
            shared_file_system: config.shared_file_system,
            container_runtime_name: config.container_runtime_name.clone(),
            stop_grace: config.stop_grace,
        };

        let committer = JsonStateCommitter::new(&config.commit_file);

        Ok(RunManager {
            config,
            runs: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
            machine,
            committer,
            runtime,
            image_manager,
            dependency_manager,
            reader,
            networks,
            bundles_dir,
        })
    }
}

fn missing(what: &str) -> WorkerError {
    WorkerError::Configuration(format!("RunManagerBuilder: {} not provided", what))
}

/// Create `<work_dir>/runs` (mode 0o770 on unix) and return its
/// canonicalised path.
fn prepare_bundles_dir(work_dir: &std::path::Path) -> Result<PathBuf> {
    let bundles_dir = work_dir.join(config::BUNDLES_DIR_NAME);
    if !bundles_dir.exists() {
        tracing::info!("{} doesn't exist, creating", bundles_dir.display());
        fs::create_dir_all(&bundles_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&bundles_dir, fs::Permissions::from_mode(0o770))?;
        }
    }
    Ok(fs::canonicalize(&bundles_dir)?)
}
