//! Collaborator capabilities consumed by the agent
//!
//! The agent never talks to the document store, the peer network, the firewall,
//! the image registry or the host shell directly. Each is reached through one of
//! the traits below so the core logic can be driven by the concrete
//! implementations in this module or by fakes in tests.

mod firewall;
mod geo;
mod hardware;
mod host;
mod image;
mod memory;
mod peers;

pub use firewall::UfwFirewall;
pub use geo::StaticGeolocator;
pub use hardware::SysinfoProbe;
pub use host::TokioHost;
pub use image::PolicyImageVerifier;
pub use memory::InMemoryStore;
pub use peers::{
    is_timestamp_in_valid_range, sign_message, verify_message, AppBroadcast, BroadcastKind,
    HttpPeerNetwork, PortCheckResponse,
};

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::{ContainerRuntime, RegistryAuth};
use crate::spec::{AppSpecification, NodeGeolocation};

/// Failures reported by collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Firewall error: {0}")]
    Firewall(String),

    #[error("{0}")]
    ImageRejected(String),

    #[error("Host command failed: {0}")]
    Host(String),

    #[error("Geolocation unavailable: {0}")]
    Geolocation(String),
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Where a peer advertises an instance of an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLocation {
    pub name: String,
    /// `ip` or `ip:port`
    pub ip: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub running_since: Option<DateTime<Utc>>,
}

impl RunLocation {
    /// Address without the API port
    pub fn host(&self) -> &str {
        strip_port(&self.ip)
    }
}

/// Strip a trailing `:port` from an address.
/// Bare IPv6 addresses are returned as they are; `[v6]:port` yields `v6`.
pub fn strip_port(addr: &str) -> &str {
    if addr.parse::<IpAddr>().is_ok() {
        return addr;
    }
    if let Some((host, _)) = addr.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
        return host;
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => addr,
    }
}

/// Signed request asking a peer to connect back to our ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCheckRequest {
    pub ip: String,
    pub ports: Vec<u16>,
    pub timestamp: i64,
    pub signature: String,
}

impl PortCheckRequest {
    /// Canonical message covered by the signature
    pub fn message(ip: &str, ports: &[u16], timestamp: i64) -> String {
        let ports: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
        format!("{}|{}|{}", ip, ports.join(","), timestamp)
    }

    pub fn signed(ip: &str, ports: Vec<u16>, network: &dyn PeerNetwork) -> Self {
        let timestamp = Utc::now().timestamp();
        let signature = network.sign(&Self::message(ip, &ports, timestamp));
        Self {
            ip: ip.to_string(),
            ports,
            timestamp,
            signature,
        }
    }
}

/// Local and network-wide app records
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn installed_apps(&self) -> CapabilityResult<Vec<AppSpecification>>;
    async fn installed_app(&self, name: &str) -> CapabilityResult<Option<AppSpecification>>;
    async fn insert_app(&self, spec: &AppSpecification) -> CapabilityResult<()>;
    async fn remove_app(&self, name: &str) -> CapabilityResult<()>;
    /// Specification registered network-wide
    async fn global_app(&self, name: &str) -> CapabilityResult<Option<AppSpecification>>;
    async fn run_locations(&self, name: &str) -> CapabilityResult<Vec<RunLocation>>;
    /// Record a location, replacing any previous one on the same host
    async fn upsert_run_location(&self, location: &RunLocation) -> CapabilityResult<()>;
    async fn remove_run_location(&self, name: &str, ip: &str) -> CapabilityResult<()>;
}

/// Peer-to-peer transport and node identity
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    async fn is_synced(&self) -> CapabilityResult<bool>;
    async fn is_confirmed(&self) -> CapabilityResult<bool>;
    /// Reachable address of this node
    async fn public_ip(&self) -> CapabilityResult<Option<String>>;
    /// Collateral identity `txhash:txindex`
    fn collateral(&self) -> Option<String>;
    fn sign(&self, message: &str) -> String;
    fn verify(&self, message: &str, signature: &str) -> bool;
    /// A random peer address, skipping `exclude`
    async fn random_peer(&self, exclude: &[String]) -> CapabilityResult<Option<String>>;
    /// Ask `peer` to connect back; `Ok(false)` when the ports were unreachable
    async fn request_port_check(
        &self,
        peer: &str,
        request: &PortCheckRequest,
    ) -> CapabilityResult<bool>;
    async fn broadcast_running(&self, app: &str) -> CapabilityResult<()>;
    async fn broadcast_removed(&self, app: &str) -> CapabilityResult<()>;
    async fn broadcast_error(&self, app: &str, message: &str) -> CapabilityResult<()>;
}

/// Host firewall and UPnP
#[async_trait]
pub trait Firewall: Send + Sync {
    async fn allow_port(&self, port: u16) -> CapabilityResult<()>;
    async fn deny_port(&self, port: u16) -> CapabilityResult<()>;
    async fn map_upnp(&self, port: u16, description: &str) -> CapabilityResult<()>;
    async fn unmap_upnp(&self, port: u16) -> CapabilityResult<()>;
    /// Port reserved by the network
    fn is_banned(&self, port: u16) -> bool;
    /// Port blocked by the node operator
    fn is_user_blocked(&self, port: u16) -> bool;
}

/// Image admission checks
#[async_trait]
pub trait ImageVerifier: Send + Sync {
    /// Check architecture, size and signature of an image before pulling
    async fn verify_image(
        &self,
        repotag: &str,
        auth: Option<&RegistryAuth>,
    ) -> CapabilityResult<()>;

    /// Decrypt the registry credentials attached to a spec
    async fn decrypt_auth(
        &self,
        repoauth: &str,
        spec: &AppSpecification,
    ) -> CapabilityResult<RegistryAuth>;
}

#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn node_geolocation(&self) -> CapabilityResult<NodeGeolocation>;
    async fn has_static_ip(&self) -> CapabilityResult<bool>;
}

/// Shell access on the host
#[async_trait]
pub trait HostSystem: Send + Sync {
    /// Run a program and return its stdout; non-zero exit is an error
    async fn run(&self, program: &str, args: &[String]) -> CapabilityResult<String>;
    async fn read_crontab(&self) -> CapabilityResult<String>;
    async fn write_crontab(&self, content: &str) -> CapabilityResult<()>;
    /// Size of a directory tree in bytes
    async fn directory_size(&self, path: &str) -> CapabilityResult<u64>;
}

/// Hardware detection backing `NodeSpecs`
pub trait HardwareProbe: Send + Sync {
    fn cpu_cores(&self) -> f64;
    fn ram_mb(&self) -> u64;
    fn ssd_gb(&self) -> u64;
}

/// All collaborators, shared by the components of one agent
#[derive(Clone)]
pub struct Capabilities {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub store: Arc<dyn AppStore>,
    pub network: Arc<dyn PeerNetwork>,
    pub firewall: Arc<dyn Firewall>,
    pub images: Arc<dyn ImageVerifier>,
    pub geolocator: Arc<dyn Geolocator>,
    pub host: Arc<dyn HostSystem>,
    pub hardware: Arc<dyn HardwareProbe>,
}
