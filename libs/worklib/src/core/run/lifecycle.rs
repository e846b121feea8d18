// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Run manager lifecycle management
//!
//! This module contains the start/stop sequencing for the manager and its
//! subcomponents, and the shutdown kill protocol:
//! - `start()` - restore the snapshot, start the caches
//! - `stop()` - kill everything, stop the caches, snapshot, tear down
//!   networks
//! - `kill_all()` - raise the kill flag on every run and wait boundedly for
//!   the registry to drain
//!
//! These methods are implemented as an extension impl on `RunManager` to
//! keep the lifecycle logic isolated from registry bookkeeping.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::core::run::manager::RunManager;
use crate::core::run::state::RunStage;
use crate::core::Result;

/// Interval between registry sweeps while draining kills.
const KILL_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

impl RunManager {
    /// Load state from disk and start the subcomponent managers.
    ///
    /// The dependency manager only runs on workers with their own disk; on
    /// a shared filesystem the server provisions dependencies in place.
    pub fn start(&self) -> Result<()> {
        self.load_state()?;
        self.image_manager.start();
        if !self.config.shared_file_system {
            self.dependency_manager.start();
        }
        Ok(())
    }

    /// Begin cleanup and block until it is safe to quit.
    ///
    /// Runs still alive when the kill timeout elapses are abandoned to the
    /// snapshot and re-adopted after the next start. Network removal
    /// failures are logged but never block shutdown.
    pub fn stop(&self) {
        tracing::info!("Stopping run manager");
        self.stopping.store(true, Ordering::SeqCst);

        self.kill_all();

        self.image_manager.stop();
        if !self.config.shared_file_system {
            self.dependency_manager.stop();
        }

        if let Err(e) = self.save_state() {
            tracing::error!("Failed to commit final snapshot: {}", e);
        }

        self.networks.teardown(self.runtime.as_ref());
        tracing::info!("Stopped run manager. Exiting");
    }

    /// Kill all runs and wait for them to drain.
    ///
    /// Raises `is_killed` on every registered run, then sweeps finished
    /// entries once per sweep interval until the registry is empty or the
    /// configured kill timeout elapses. The registry lock is released
    /// between sweeps so the ticking task can keep advancing runs toward
    /// `Finished`.
    pub fn kill_all(&self) {
        tracing::debug!("Killing all runs");
        {
            let mut runs = self.runs.lock();
            for run in runs.values_mut() {
                run.kill_message = Some("Worker stopped".to_string());
                run.is_killed = true;
            }
        }

        let attempts = self.config.kill_timeout.as_secs().max(1);
        for attempt in 0..attempts {
            {
                let mut runs = self.runs.lock();
                runs.retain(|_, run| run.stage != RunStage::Finished);
                if runs.is_empty() {
                    return;
                }
                tracing::debug!(
                    "Waiting for {} more run(s). {} seconds until force quit",
                    runs.len(),
                    attempts - attempt
                );
            }
            std::thread::sleep(KILL_SWEEP_INTERVAL);
        }

        let abandoned = self.runs.lock().len();
        if abandoned > 0 {
            tracing::warn!(
                "{} run(s) still alive after {}s kill timeout, abandoning to snapshot",
                abandoned,
                attempts
            );
        }
    }
}
