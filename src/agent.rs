//! Node agent wiring
//!
//! [`NodeAgent`] owns the node state and every component, and starts the
//! background loops: monitoring samplers, the CPU throttle controller, the
//! availability probe, the DOS evictor and the instance enforcer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::availability::{AvailabilityProbe, DosEvictor};
use crate::capabilities::{
    Capabilities, CapabilityResult, HostSystem, HttpPeerNetwork, InMemoryStore,
    PolicyImageVerifier, StaticGeolocator, SysinfoProbe, TokioHost, UfwFirewall,
};
use crate::config::Config;
use crate::enforcer::InstanceEnforcer;
use crate::lifecycle::Lifecycle;
use crate::monitoring::MonitoringEngine;
use crate::runtime::DockerCli;
use crate::scheduler::ScheduledHandle;
use crate::state::NodeState;

pub struct NodeAgent {
    pub config: Arc<Config>,
    pub state: Arc<NodeState>,
    pub caps: Capabilities,
    pub monitor: Arc<MonitoringEngine>,
    pub lifecycle: Lifecycle,
    pub probe: Arc<AvailabilityProbe>,
    pub evictor: Arc<DosEvictor>,
    pub enforcer: Arc<InstanceEnforcer>,
    tasks: Mutex<Vec<ScheduledHandle>>,
}

/// Collaborators backed by the host: Docker, ufw, the shell and sysinfo
pub fn host_capabilities(config: &Config) -> Capabilities {
    let host: Arc<dyn HostSystem> = Arc::new(TokioHost::new());
    Capabilities {
        runtime: Arc::new(DockerCli::new()),
        store: Arc::new(InMemoryStore::new()),
        network: Arc::new(HttpPeerNetwork::new(config.peers.clone())),
        firewall: Arc::new(UfwFirewall::new(host.clone())),
        images: Arc::new(PolicyImageVerifier::new(config.images.clone(), host.clone())),
        geolocator: Arc::new(StaticGeolocator::new(config.geolocation.clone())),
        hardware: Arc::new(SysinfoProbe::new()),
        host,
    }
}

impl NodeAgent {
    pub fn new(config: Config, caps: Capabilities) -> Self {
        let config = Arc::new(config);
        let state = Arc::new(NodeState::new());
        let monitor = Arc::new(MonitoringEngine::new(
            config.monitoring.clone(),
            caps.runtime.clone(),
            caps.host.clone(),
        ));
        let lifecycle = Lifecycle::new(config.clone(), state.clone(), caps.clone(), monitor.clone());
        let probe = Arc::new(AvailabilityProbe::new(
            config.clone(),
            state.clone(),
            caps.clone(),
        ));
        let evictor = Arc::new(DosEvictor::new(
            state.clone(),
            caps.store.clone(),
            lifecycle.clone(),
            Duration::from_secs(config.probe.eviction_interval_secs),
        ));
        let enforcer = Arc::new(InstanceEnforcer::new(
            config.clone(),
            state.clone(),
            caps.clone(),
            lifecycle.clone(),
        ));

        Self {
            config,
            state,
            caps,
            monitor,
            lifecycle,
            probe,
            evictor,
            enforcer,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Agent using the host-backed collaborators
    pub fn with_host_capabilities(config: Config) -> Self {
        let caps = host_capabilities(&config);
        Self::new(config, caps)
    }

    /// Start monitoring every component of every installed app
    pub async fn resume_monitoring(&self) -> CapabilityResult<usize> {
        let prefix = &self.config.node.container_prefix;
        let tier = self.config.node.tier;
        let mut started = 0;
        for app in self.caps.store.installed_apps().await? {
            for component in app.components() {
                self.monitor
                    .start_monitoring(&component.app_id(prefix), component.resources(tier).cpu);
                started += 1;
            }
        }
        Ok(started)
    }

    /// Spawn the background loops
    pub async fn start(&self) {
        match self.resume_monitoring().await {
            Ok(count) => info!("Monitoring resumed for {} containers", count),
            Err(e) => warn!("Monitoring not resumed: {}", e),
        }

        let specs = self.lifecycle.admission().node_specs();
        info!(
            "Node specs: {} cores, {} MB RAM, {} GB SSD ({} tier)",
            specs.cpu_cores, specs.ram_mb, specs.ssd_gb, self.config.node.tier
        );

        let handles = vec![
            self.monitor.spawn_throttle_controller(),
            self.probe.spawn(),
            self.evictor.spawn(),
            self.enforcer.spawn(),
        ];
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for handle in &handles {
            info!("Started {}", handle.name());
        }
        tasks.extend(handles);
    }

    /// Stop every background loop and sampler
    pub async fn shutdown(&self) {
        let handles: Vec<ScheduledHandle> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for handle in handles {
            handle.shutdown().await;
        }
        self.monitor.stop_all();
        info!("Node agent stopped");
    }
}
