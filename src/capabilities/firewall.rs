//! ufw firewall and miniupnpc port mapping

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{CapabilityError, CapabilityResult, Firewall, HostSystem};

/// Ports the network reserves for its own services
pub const BANNED_PORTS: &[u16] = &[16124, 16125, 16126, 16127, 16128, 16129];

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

pub fn generate_allow_args(port: u16) -> Vec<String> {
    vec!["allow".to_string(), port.to_string()]
}

pub fn generate_deny_args(port: u16) -> Vec<String> {
    vec!["delete".to_string(), "allow".to_string(), port.to_string()]
}

pub fn generate_upnp_map_args(port: u16, description: &str) -> Vec<String> {
    vec![
        "-e".to_string(),
        description.to_string(),
        "-r".to_string(),
        port.to_string(),
        "TCP".to_string(),
        port.to_string(),
        "UDP".to_string(),
    ]
}

pub fn generate_upnp_unmap_args(port: u16) -> Vec<String> {
    vec![
        "-d".to_string(),
        port.to_string(),
        "TCP".to_string(),
    ]
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Firewall driven through `ufw` and `upnpc` on the host
pub struct UfwFirewall {
    host: Arc<dyn HostSystem>,
    user_blocked: HashSet<u16>,
}

impl UfwFirewall {
    pub fn new(host: Arc<dyn HostSystem>) -> Self {
        Self {
            host,
            user_blocked: HashSet::new(),
        }
    }

    pub fn with_blocked_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.user_blocked.extend(ports);
        self
    }
}

#[async_trait]
impl Firewall for UfwFirewall {
    async fn allow_port(&self, port: u16) -> CapabilityResult<()> {
        self.host
            .run("ufw", &generate_allow_args(port))
            .await
            .map(|_| ())
            .map_err(|e| CapabilityError::Firewall(e.to_string()))
    }

    async fn deny_port(&self, port: u16) -> CapabilityResult<()> {
        self.host
            .run("ufw", &generate_deny_args(port))
            .await
            .map(|_| ())
            .map_err(|e| CapabilityError::Firewall(e.to_string()))
    }

    async fn map_upnp(&self, port: u16, description: &str) -> CapabilityResult<()> {
        self.host
            .run("upnpc", &generate_upnp_map_args(port, description))
            .await
            .map(|_| ())
            .map_err(|e| CapabilityError::Firewall(e.to_string()))
    }

    async fn unmap_upnp(&self, port: u16) -> CapabilityResult<()> {
        self.host
            .run("upnpc", &generate_upnp_unmap_args(port))
            .await
            .map(|_| ())
            .map_err(|e| CapabilityError::Firewall(e.to_string()))
    }

    fn is_banned(&self, port: u16) -> bool {
        BANNED_PORTS.contains(&port)
    }

    fn is_user_blocked(&self, port: u16) -> bool {
        self.user_blocked.contains(&port)
    }
}
