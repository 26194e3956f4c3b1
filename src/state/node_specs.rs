//! Cached node hardware

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::capabilities::HardwareProbe;
use crate::config::NodeConfig;

/// CPU cores, RAM in MB and SSD in GB of this node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpecs {
    pub cpu_cores: f64,
    pub ram_mb: u64,
    pub ssd_gb: u64,
}

/// Lazily populated hardware record.
///
/// A manual value from the node configuration always wins. Otherwise a field is
/// detected on first use and never queried again once it is non-zero.
#[derive(Debug, Default)]
pub struct NodeSpecsCache {
    cached: Mutex<NodeSpecs>,
}

impl NodeSpecsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, config: &NodeConfig, probe: &dyn HardwareProbe) -> NodeSpecs {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());

        if config.cpu_cores > 0.0 {
            cached.cpu_cores = config.cpu_cores;
        } else if cached.cpu_cores == 0.0 {
            cached.cpu_cores = probe.cpu_cores();
        }

        if config.ram_mb > 0 {
            cached.ram_mb = config.ram_mb;
        } else if cached.ram_mb == 0 {
            cached.ram_mb = probe.ram_mb();
        }

        if config.ssd_gb > 0 {
            cached.ssd_gb = config.ssd_gb;
        } else if cached.ssd_gb == 0 {
            cached.ssd_gb = probe.ssd_gb();
        }

        *cached
    }

    /// Last resolved values without probing
    pub fn snapshot(&self) -> NodeSpecs {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn reset(&self) {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = NodeSpecs::default();
    }
}
