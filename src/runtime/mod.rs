//! Container runtime capability
//!
//! [`ContainerRuntime`] is the surface the lifecycle and monitoring components
//! need from a container engine. [`DockerCli`] implements it on top of the
//! `docker` command line.

pub mod docker;

pub use docker::DockerCli;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilityResult;
use crate::progress::ProgressSender;

/// Registry credentials for a private image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

/// Everything needed to create one app container
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    /// Dedicated network of the owning app
    pub network: String,
    /// Host/container port pairs
    pub ports: Vec<(u16, u16)>,
    pub env: Vec<String>,
    pub commands: Vec<String>,
    /// Host directory bound to the container data path
    pub volume: Option<(String, String)>,
    pub nano_cpus: u64,
    pub memory_mb: u64,
}

/// Point-in-time container statistics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerStats {
    /// Percent of one core, so a container using two full cores reports 200
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub pids: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    pub kind: MountKind,
    pub source: String,
    pub destination: String,
}

/// Subset of container inspection used by the agent
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerInspect {
    pub running: bool,
    /// Current CPU quota in nano-CPUs; 0 when unlimited
    pub nano_cpus: u64,
    pub mounts: Vec<MountInfo>,
    /// Size of the container root filesystem in bytes
    pub size_root_fs: u64,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image, reporting progress lines as they arrive
    async fn pull_image(
        &self,
        repotag: &str,
        auth: Option<&RegistryAuth>,
        progress: &ProgressSender,
    ) -> CapabilityResult<()>;

    async fn create_container(&self, config: &ContainerConfig) -> CapabilityResult<()>;
    async fn start_container(&self, name: &str) -> CapabilityResult<()>;
    async fn stop_container(&self, name: &str) -> CapabilityResult<()>;
    async fn remove_container(&self, name: &str) -> CapabilityResult<()>;

    /// `None` when the container does not exist
    async fn inspect_container(&self, name: &str) -> CapabilityResult<Option<ContainerInspect>>;
    async fn container_stats(&self, name: &str) -> CapabilityResult<ContainerStats>;
    async fn update_cpu_quota(&self, name: &str, nano_cpus: u64) -> CapabilityResult<()>;

    async fn remove_image(&self, repotag: &str) -> CapabilityResult<()>;
    async fn create_network(&self, name: &str) -> CapabilityResult<()>;
    async fn remove_network(&self, name: &str) -> CapabilityResult<()>;
    /// Remove unused containers, images, volumes and networks
    async fn prune(&self) -> CapabilityResult<()>;
}
