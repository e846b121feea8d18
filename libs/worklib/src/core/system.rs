// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host resource queries
//!
//! Thin wrappers over `sysinfo` plus a recursive directory-size walk used
//! for run disk accounting. Query failures are reported as "unknown"
//! (`None`), never as errors.

use std::fs;
use std::path::Path;

use sysinfo::{Disks, System};

/// Total installed memory of this host in bytes.
pub fn total_memory_bytes() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory()
}

/// Available disk space in bytes for the filesystem holding `path`, or
/// `None` when it cannot be determined.
pub fn free_disk_bytes(path: &Path) -> Option<u64> {
    let resolved = fs::canonicalize(path).ok()?;
    let disks = Disks::new_with_refreshed_list();

    // Pick the disk with the longest mount point that prefixes the path;
    // "/" matches everything, a dedicated /scratch mount wins over it.
    disks
        .list()
        .iter()
        .filter(|disk| resolved.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Total size in bytes of all regular files under `path`, without
/// following symlinks.
pub fn path_size_bytes(path: &Path) -> std::io::Result<u64> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    if !metadata.is_dir() {
        return Ok(0);
    }

    let mut total = 0u64;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let entry_meta = entry.metadata()?;
        if entry_meta.file_type().is_symlink() {
            continue;
        }
        if entry_meta.is_dir() {
            total += path_size_bytes(&entry.path())?;
        } else {
            total += entry_meta.len();
        }
    }
    Ok(total)
}
