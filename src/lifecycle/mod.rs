//! Installation and removal of apps
//!
//! One install or removal runs at a time node-wide, guarded by the
//! [`ProgressLock`](crate::state::ProgressLock) in [`NodeState`]. Compose
//! components are installed in declared order and torn down in reverse.

mod install;
mod remove;
pub mod volume;

pub use volume::{ProvisioningError, VolumePaths, VolumeProvisioner};

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use crate::admission::{AdmissionController, AdmissionError};
use crate::capabilities::{Capabilities, CapabilityError, RunLocation};
use crate::config::Config;
use crate::monitoring::MonitoringEngine;
use crate::progress::ProgressMessage;
use crate::spec::SpecError;
use crate::state::{ConflictError, NodeState};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    InvalidSpec(#[from] SpecError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Application {0} not found")]
    NotFound(String),

    #[error("Application {0} is already installed")]
    AlreadyInstalled(String),
}

impl LifecycleError {
    /// Error kind reported in the `name` field of an error line
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleError::Admission(_) => "AdmissionError",
            LifecycleError::InvalidSpec(_) => "SpecificationError",
            LifecycleError::Conflict(_) => "ConflictError",
            LifecycleError::Provisioning(_) => "ProvisioningError",
            LifecycleError::Capability(_) => "CapabilityError",
            LifecycleError::NotFound(_) => "NotFoundError",
            LifecycleError::AlreadyInstalled(_) => "ConflictError",
        }
    }

    /// HTTP-style status code reported in the `code` field of an error line
    pub fn code(&self) -> Option<u16> {
        match self {
            LifecycleError::Conflict(_) | LifecycleError::AlreadyInstalled(_) => Some(409),
            LifecycleError::NotFound(_) => Some(404),
            LifecycleError::Admission(_) | LifecycleError::InvalidSpec(_) => Some(422),
            _ => None,
        }
    }

    pub fn to_progress(&self) -> ProgressMessage {
        ProgressMessage::error(self.to_string(), self.name(), self.code())
    }
}

/// Hard operations own a volume; soft ones reuse it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    pub mode: InstallMode,
    /// Skip the conflict check and fall back to the global spec
    pub force: bool,
    /// Emit a terminal progress line
    pub end_response: bool,
    pub notify_peers: bool,
}

impl RemoveOptions {
    /// Removal requested by a user
    pub fn user(force: bool) -> Self {
        Self {
            mode: InstallMode::Hard,
            force,
            end_response: true,
            notify_peers: true,
        }
    }

    /// Forced removal initiated by the agent itself
    pub fn background() -> Self {
        Self {
            mode: InstallMode::Hard,
            force: true,
            end_response: false,
            notify_peers: true,
        }
    }
}

/// Runs installs, removals and redeploys
#[derive(Clone)]
pub struct Lifecycle {
    config: Arc<Config>,
    state: Arc<NodeState>,
    caps: Capabilities,
    admission: AdmissionController,
    monitor: Arc<MonitoringEngine>,
    volumes: VolumeProvisioner,
}

impl Lifecycle {
    pub fn new(
        config: Arc<Config>,
        state: Arc<NodeState>,
        caps: Capabilities,
        monitor: Arc<MonitoringEngine>,
    ) -> Self {
        let admission = AdmissionController::new(config.clone(), state.clone(), caps.clone());
        let volumes = VolumeProvisioner::new(
            caps.host.clone(),
            config.apps.folder_path().to_string_lossy().into_owned(),
            config.apps.volume_headroom_gb,
        );
        Self {
            config,
            state,
            caps,
            admission,
            monitor,
            volumes,
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    fn network_name(&self, app_name: &str) -> String {
        format!("{}_{}", self.config.node.container_prefix, app_name)
    }

    /// Run location advertising this node, `None` without a public IP
    async fn own_location(&self, app_name: &str) -> Option<RunLocation> {
        match self.caps.network.public_ip().await {
            Ok(Some(ip)) => Some(RunLocation {
                name: app_name.to_string(),
                ip,
                hash: String::new(),
                running_since: Some(Utc::now()),
            }),
            Ok(None) => None,
            Err(e) => {
                warn!("Public IP unknown: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_lines() {
        let err = LifecycleError::Conflict(ConflictError::Installing);
        let line = err.to_progress();
        assert!(line.is_terminal());
        let data = line.data.unwrap();
        assert_eq!(
            data["message"],
            "Another application is undergoing installation"
        );
        assert_eq!(data["name"], "ConflictError");
        assert_eq!(data["code"], 409);

        let err = LifecycleError::Admission(AdmissionError::InsufficientSpace);
        assert_eq!(
            err.to_string(),
            "Insufficient space on node to spawn an application"
        );
    }

    #[test]
    fn test_remove_options() {
        let user = RemoveOptions::user(false);
        assert!(user.end_response && !user.force);
        let bg = RemoveOptions::background();
        assert!(bg.force && !bg.end_response);
    }
}
