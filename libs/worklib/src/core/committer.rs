// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Crash-safe JSON snapshot persistence
//!
//! The run registry is committed to a single JSON file. Writes go to a
//! sibling temporary file that is atomically renamed over the target, so a
//! half-written snapshot is never observable. Only the run manager
//! interprets the contents.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::{Result, WorkerError};

/// Commits serializable state to a JSON file with atomic replacement.
pub struct JsonStateCommitter {
    path: PathBuf,
}

impl JsonStateCommitter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably replace the on-disk snapshot with `state`.
    pub fn commit<T: Serialize>(&self, state: &T) -> Result<()> {
        let payload = serde_json::to_vec(state)
            .map_err(|e| WorkerError::Snapshot(format!("serialize failed: {}", e)))?;

        let tmp_path = self.tmp_path();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&payload)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        tracing::debug!("Committed state snapshot to {}", self.path.display());
        Ok(())
    }

    /// Load the last successfully committed snapshot, or a default value on
    /// first boot (no snapshot file yet).
    pub fn load<T: DeserializeOwned + Default>(&self) -> Result<T> {
        let payload = match fs::read(&self.path) {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    "No state snapshot at {}, starting empty",
                    self.path.display()
                );
                return Ok(T::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&payload).map_err(|e| {
            WorkerError::Snapshot(format!(
                "failed to parse snapshot {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
