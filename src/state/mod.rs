//! Process-wide agent state
//!
//! Cached hardware, the install/removal lock and the DOS health state live in
//! one [`NodeState`] owned by the agent and shared with every component.

mod lock;
mod node_specs;

pub use lock::{ConflictError, ProgressFlags, ProgressGuard, ProgressLock};
pub use node_specs::{NodeSpecs, NodeSpecsCache};

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Self-assessed reachability health of the node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DosState {
    /// 0-100; 100 means the node declared itself unreachable
    pub score: u32,
    /// Set while the node is in DOS; drives local app eviction
    pub message: Option<String>,
    /// Reported by volume mount checks
    pub mount_message: Option<String>,
    /// Reported by duplicate-IP detection
    pub duplicate_message: Option<String>,
}

impl DosState {
    /// External condition that forces the DOS message
    pub fn external_condition(&self) -> Option<&str> {
        self.mount_message
            .as_deref()
            .or(self.duplicate_message.as_deref())
    }
}

#[derive(Debug, Default)]
pub struct NodeState {
    pub specs: NodeSpecsCache,
    pub progress: ProgressLock,
    dos: Mutex<DosState>,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dos(&self) -> DosState {
        self.dos.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mutate the DOS state in one critical section
    pub fn update_dos<R>(&self, f: impl FnOnce(&mut DosState) -> R) -> R {
        let mut dos = self.dos.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut dos)
    }

    /// Return everything to its start-up value
    pub fn reset(&self) {
        self.specs.reset();
        self.progress.reset();
        *self.dos.lock().unwrap_or_else(|e| e.into_inner()) = DosState::default();
    }
}
