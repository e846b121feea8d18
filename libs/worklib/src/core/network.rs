// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker container networks
//!
//! Every worker owns three networks: `<prefix>_general` for worker-to-
//! container I/O (read/write/netcat), `<prefix>_int` for runs without
//! egress, and `<prefix>_ext` for runs allowed to reach the outside world.
//! Provisioning is idempotent so several restarts (or a concurrent worker
//! on the same host) converge on the same networks.

use crate::core::container::ContainerRuntime;
use crate::core::{Result, WorkerError};

/// Names of the three provisioned worker networks.
#[derive(Debug, Clone)]
pub struct WorkerNetworks {
    pub general: String,
    pub external: String,
    pub internal: String,
}

impl WorkerNetworks {
    /// Derive the network names for a prefix.
    pub fn names(prefix: &str) -> Self {
        Self {
            general: format!("{}_general", prefix),
            external: format!("{}_ext", prefix),
            internal: format!("{}_int", prefix),
        }
    }

    /// Create (or adopt) the three worker networks.
    ///
    /// The general and internal networks are isolated from the host's
    /// external network; the external network permits egress.
    pub fn provision(prefix: &str, runtime: &dyn ContainerRuntime) -> Result<Self> {
        let networks = Self::names(prefix);
        create_or_get(runtime, &networks.general, true)?;
        create_or_get(runtime, &networks.external, false)?;
        create_or_get(runtime, &networks.internal, true)?;
        Ok(networks)
    }

    /// Remove the three networks. Failures are logged, not propagated: a
    /// leftover container or another worker may still hold them.
    pub fn teardown(&self, runtime: &dyn ContainerRuntime) {
        for name in [&self.general, &self.internal, &self.external] {
            if let Err(e) = runtime.network_remove(name) {
                tracing::error!("Cannot remove network {}: {}", name, e);
            }
        }
    }
}

fn create_or_get(runtime: &dyn ContainerRuntime, name: &str, internal: bool) -> Result<String> {
    tracing::debug!("Creating network {}", name);
    match runtime.network_create(name, internal) {
        Ok(id) => Ok(id),
        Err(create_err) => match runtime.network_lookup(name) {
            Ok(Some(id)) => {
                tracing::debug!("Network {} already exists, reusing", name);
                Ok(id)
            }
            Ok(None) => Err(create_err),
            Err(_) => Err(WorkerError::NetworkNotFound(name.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_names() {
        let networks = WorkerNetworks::names("worklib_worker_network");
        assert_eq!(networks.general, "worklib_worker_network_general");
        assert_eq!(networks.external, "worklib_worker_network_ext");
        assert_eq!(networks.internal, "worklib_worker_network_int");
    }
}
