// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bundle descriptions as dispatched by the server
//!
//! A bundle is an immutable job description identified by a UUID. The core
//! treats it as opaque apart from its dependency list and the resource
//! request that rides along with it.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A declared dependency of a bundle: another bundle's output mounted
/// read-only into this bundle's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// UUID of the bundle the data comes from.
    pub parent_uuid: String,

    /// Path inside the parent bundle, relative to its root.
    #[serde(default)]
    pub parent_path: String,

    /// Mount point relative to this bundle's working directory.
    pub child_path: String,
}

/// Server-provided description of a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleInfo {
    /// Bundle UUID; unique across the cluster.
    pub uuid: String,

    /// Server-assigned bundle directory, used verbatim on shared
    /// filesystem workers.
    #[serde(default)]
    pub location: Option<PathBuf>,

    /// Declared dependencies.
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

impl BundleInfo {
    /// True when `path` names one of this bundle's dependency mount points.
    ///
    /// Dependency mounts are read-only; writes aimed at them must be
    /// refused. Comparison is on normalized relative paths so `./foo` and
    /// `foo` match.
    pub fn is_dependency_path(&self, path: &str) -> bool {
        let wanted = normalize_path(path);
        self.dependencies
            .iter()
            .any(|dep| normalize_path(&dep.child_path) == wanted)
    }
}

/// Resources a run requests, plus the command/image descriptor it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResources {
    /// Requested CPU count.
    pub cpus: usize,

    /// Requested GPU count.
    pub gpus: usize,

    /// Memory limit in bytes, enforced by the container runtime.
    pub memory_bytes: u64,

    /// Disk limit in bytes for the run's working directory. Zero disables
    /// enforcement.
    #[serde(default)]
    pub disk_bytes: u64,

    /// Whether the run may reach the external network.
    #[serde(default)]
    pub network: bool,

    /// Container image reference.
    pub docker_image: String,

    /// Command executed inside the container.
    pub command: String,
}

/// Lexically normalize a relative path: drop `.` components and resolve
/// `..` against previously seen components, without touching the
/// filesystem.
pub(crate) fn normalize_path(path: &str) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
