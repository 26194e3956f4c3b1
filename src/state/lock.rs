//! Node-wide install/removal mutual exclusion

use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// A conflicting operation is already running
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictError {
    #[error("Another application is undergoing installation")]
    Installing,

    #[error("Another application is undergoing removal")]
    Removing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressFlags {
    pub installing: bool,
    pub removing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Install,
    Removal,
}

/// Single global token serializing installs and removals.
///
/// Conflicting requests are rejected, never queued. The check and the set
/// happen under one mutex acquisition.
#[derive(Debug, Default)]
pub struct ProgressLock {
    flags: Mutex<ProgressFlags>,
}

impl ProgressLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> ProgressFlags {
        *self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn try_begin_install(&self) -> Result<ProgressGuard<'_>, ConflictError> {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        if flags.removing {
            warn!("Installation rejected: removal in progress");
            return Err(ConflictError::Removing);
        }
        if flags.installing {
            warn!("Installation rejected: installation in progress");
            return Err(ConflictError::Installing);
        }
        flags.installing = true;
        Ok(ProgressGuard {
            lock: self,
            operation: Operation::Install,
            owned: true,
        })
    }

    /// Begin a removal; `force` skips the conflict check
    pub fn try_begin_removal(&self, force: bool) -> Result<ProgressGuard<'_>, ConflictError> {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        if !force {
            if flags.removing {
                warn!("Removal rejected: removal in progress");
                return Err(ConflictError::Removing);
            }
            if flags.installing {
                warn!("Removal rejected: installation in progress");
                return Err(ConflictError::Installing);
            }
        }
        let owned = !flags.removing;
        flags.removing = true;
        Ok(ProgressGuard {
            lock: self,
            operation: Operation::Removal,
            owned,
        })
    }

    pub fn reset(&self) {
        *self.flags.lock().unwrap_or_else(|e| e.into_inner()) = ProgressFlags::default();
    }
}

/// Releases its flag on drop, on every exit path
#[derive(Debug)]
pub struct ProgressGuard<'a> {
    lock: &'a ProgressLock,
    operation: Operation,
    owned: bool,
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        let mut flags = self.lock.flags.lock().unwrap_or_else(|e| e.into_inner());
        match self.operation {
            Operation::Install => flags.installing = false,
            Operation::Removal => flags.removing = false,
        }
    }
}
