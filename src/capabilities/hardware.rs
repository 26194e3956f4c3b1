//! Hardware detection with `sysinfo`

use std::sync::Mutex;

use sysinfo::{Disks, System};

use super::HardwareProbe;

/// Hardware probe reading the local machine
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }
}

/// Total size in GB of the non-removable disks
pub fn fixed_disk_gb(disks: &Disks) -> u64 {
    let bytes: u64 = disks
        .iter()
        .filter(|d| !d.is_removable())
        .map(|d| d.total_space())
        .sum();
    bytes / 1_000_000_000
}

impl HardwareProbe for SysinfoProbe {
    fn cpu_cores(&self) -> f64 {
        match self.system.lock() {
            Ok(mut system) => {
                system.refresh_cpu_all();
                system.cpus().len() as f64
            }
            Err(_) => 0.0,
        }
    }

    fn ram_mb(&self) -> u64 {
        match self.system.lock() {
            Ok(mut system) => {
                system.refresh_memory();
                system.total_memory() / (1024 * 1024)
            }
            Err(_) => 0,
        }
    }

    fn ssd_gb(&self) -> u64 {
        fixed_disk_gb(&Disks::new_with_refreshed_list())
    }
}
