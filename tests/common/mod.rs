//! Fake collaborators shared by the integration tests
//!
//! Every fake appends to one shared [`CallLog`] so tests can assert on the
//! order of side effects across collaborators.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use apphost::agent::NodeAgent;
use apphost::capabilities::{
    sign_message, verify_message, Capabilities, CapabilityError, CapabilityResult, Firewall,
    Geolocator, HardwareProbe, HostSystem, ImageVerifier, InMemoryStore, PeerNetwork,
    PortCheckRequest,
};
use apphost::config::Config;
use apphost::progress::{ProgressMessage, ProgressSender};
use apphost::runtime::{
    ContainerConfig, ContainerInspect, ContainerRuntime, ContainerStats, RegistryAuth,
};
use apphost::spec::{AppSpecification, NodeGeolocation};

pub const NODE_KEY: &str = "integration-test-key";
pub const NODE_IP: &str = "203.0.113.5";

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries starting with `prefix`, with the prefix stripped
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

// ============================================================================
// Container runtime
// ============================================================================

pub struct FakeRuntime {
    log: CallLog,
    containers: Mutex<HashMap<String, ContainerInspect>>,
    cpu_percent: Mutex<f64>,
    fail_create: Mutex<Option<String>>,
}

impl FakeRuntime {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            containers: Mutex::new(HashMap::new()),
            cpu_percent: Mutex::new(10.0),
            fail_create: Mutex::new(None),
        }
    }

    pub fn set_cpu_percent(&self, cpu: f64) {
        *self.cpu_percent.lock().unwrap() = cpu;
    }

    /// Make creation of container `name` fail
    pub fn fail_create_of(&self, name: &str) {
        *self.fail_create.lock().unwrap() = Some(name.to_string());
    }

    pub fn add_container(&self, name: &str, nano_cpus: u64) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            ContainerInspect {
                running: true,
                nano_cpus,
                ..Default::default()
            },
        );
    }

    pub fn container(&self, name: &str) -> Option<ContainerInspect> {
        self.containers.lock().unwrap().get(name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull_image(
        &self,
        repotag: &str,
        _auth: Option<&RegistryAuth>,
        progress: &ProgressSender,
    ) -> CapabilityResult<()> {
        self.log.push(format!("pull:{}", repotag));
        progress.send(ProgressMessage::status(format!("Pulled {}", repotag)));
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> CapabilityResult<()> {
        self.log.push(format!("create:{}", config.name));
        if self.fail_create.lock().unwrap().as_deref() == Some(config.name.as_str()) {
            return Err(CapabilityError::Runtime(format!(
                "cannot create {}",
                config.name
            )));
        }
        self.add_container(&config.name, config.nano_cpus);
        Ok(())
    }

    async fn start_container(&self, name: &str) -> CapabilityResult<()> {
        self.log.push(format!("start:{}", name));
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> CapabilityResult<()> {
        self.log.push(format!("stop:{}", name));
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> CapabilityResult<()> {
        self.log.push(format!("rm:{}", name));
        match self.containers.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(CapabilityError::Runtime(format!("No such container: {}", name))),
        }
    }

    async fn inspect_container(&self, name: &str) -> CapabilityResult<Option<ContainerInspect>> {
        Ok(self.container(name))
    }

    async fn container_stats(&self, _name: &str) -> CapabilityResult<ContainerStats> {
        Ok(ContainerStats {
            cpu_percent: *self.cpu_percent.lock().unwrap(),
            memory_usage_bytes: 64 * 1024 * 1024,
            memory_limit_bytes: 512 * 1024 * 1024,
            pids: 3,
        })
    }

    async fn update_cpu_quota(&self, name: &str, nano_cpus: u64) -> CapabilityResult<()> {
        self.log.push(format!("update:{}:{}", name, nano_cpus));
        if let Some(container) = self.containers.lock().unwrap().get_mut(name) {
            container.nano_cpus = nano_cpus;
        }
        Ok(())
    }

    async fn remove_image(&self, repotag: &str) -> CapabilityResult<()> {
        self.log.push(format!("rmi:{}", repotag));
        Ok(())
    }

    async fn create_network(&self, name: &str) -> CapabilityResult<()> {
        self.log.push(format!("network-create:{}", name));
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> CapabilityResult<()> {
        self.log.push(format!("network-rm:{}", name));
        Ok(())
    }

    async fn prune(&self) -> CapabilityResult<()> {
        self.log.push("prune");
        Ok(())
    }
}

// ============================================================================
// Peer network
// ============================================================================

pub struct FakeNetwork {
    log: CallLog,
    pub synced: AtomicBool,
    pub confirmed: AtomicBool,
    pub reachable: AtomicBool,
    /// Port checks fail with a network error
    pub peer_down: AtomicBool,
    public_ip: Mutex<Option<String>>,
}

impl FakeNetwork {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            synced: AtomicBool::new(true),
            confirmed: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            peer_down: AtomicBool::new(false),
            public_ip: Mutex::new(Some(NODE_IP.to_string())),
        }
    }

    pub fn set_public_ip(&self, ip: Option<&str>) {
        *self.public_ip.lock().unwrap() = ip.map(str::to_string);
    }
}

#[async_trait]
impl PeerNetwork for FakeNetwork {
    async fn is_synced(&self) -> CapabilityResult<bool> {
        Ok(self.synced.load(Ordering::SeqCst))
    }

    async fn is_confirmed(&self) -> CapabilityResult<bool> {
        Ok(self.confirmed.load(Ordering::SeqCst))
    }

    async fn public_ip(&self) -> CapabilityResult<Option<String>> {
        Ok(self.public_ip.lock().unwrap().clone())
    }

    fn collateral(&self) -> Option<String> {
        Some("abcd:0".to_string())
    }

    fn sign(&self, message: &str) -> String {
        sign_message(message, NODE_KEY)
    }

    fn verify(&self, message: &str, signature: &str) -> bool {
        verify_message(message, signature, NODE_KEY)
    }

    async fn random_peer(&self, exclude: &[String]) -> CapabilityResult<Option<String>> {
        let peer = "http://peer.test".to_string();
        Ok((!exclude.contains(&peer)).then_some(peer))
    }

    async fn request_port_check(
        &self,
        _peer: &str,
        request: &PortCheckRequest,
    ) -> CapabilityResult<bool> {
        self.log.push(format!("port-check:{:?}", request.ports));
        if self.peer_down.load(Ordering::SeqCst) {
            return Err(CapabilityError::Network("peer.test did not answer".to_string()));
        }
        Ok(self.reachable.load(Ordering::SeqCst))
    }

    async fn broadcast_running(&self, app: &str) -> CapabilityResult<()> {
        self.log.push(format!("broadcast-running:{}", app));
        Ok(())
    }

    async fn broadcast_removed(&self, app: &str) -> CapabilityResult<()> {
        self.log.push(format!("broadcast-removed:{}", app));
        Ok(())
    }

    async fn broadcast_error(&self, app: &str, _message: &str) -> CapabilityResult<()> {
        self.log.push(format!("broadcast-error:{}", app));
        Ok(())
    }
}

// ============================================================================
// Firewall, images, geolocation, hardware
// ============================================================================

pub struct FakeFirewall {
    log: CallLog,
    banned: Mutex<BTreeSet<u16>>,
    blocked: Mutex<BTreeSet<u16>>,
}

impl FakeFirewall {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            banned: Mutex::new((16124..=16129).collect()),
            blocked: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn ban(&self, port: u16) {
        self.banned.lock().unwrap().insert(port);
    }

    /// Block `port` the way an operator's firewall rule would
    pub fn block(&self, port: u16) {
        self.blocked.lock().unwrap().insert(port);
    }
}

#[async_trait]
impl Firewall for FakeFirewall {
    async fn allow_port(&self, port: u16) -> CapabilityResult<()> {
        self.log.push(format!("allow:{}", port));
        Ok(())
    }

    async fn deny_port(&self, port: u16) -> CapabilityResult<()> {
        self.log.push(format!("deny:{}", port));
        Ok(())
    }

    async fn map_upnp(&self, port: u16, _description: &str) -> CapabilityResult<()> {
        self.log.push(format!("upnp-map:{}", port));
        Ok(())
    }

    async fn unmap_upnp(&self, port: u16) -> CapabilityResult<()> {
        self.log.push(format!("upnp-unmap:{}", port));
        Ok(())
    }

    fn is_banned(&self, port: u16) -> bool {
        self.banned.lock().unwrap().contains(&port)
    }

    fn is_user_blocked(&self, port: u16) -> bool {
        self.blocked.lock().unwrap().contains(&port)
    }
}

pub struct FakeImages;

#[async_trait]
impl ImageVerifier for FakeImages {
    async fn verify_image(
        &self,
        repotag: &str,
        _auth: Option<&RegistryAuth>,
    ) -> CapabilityResult<()> {
        if repotag.starts_with("blocked/") {
            return Err(CapabilityError::ImageRejected(format!(
                "Image {} is blocked",
                repotag
            )));
        }
        Ok(())
    }

    async fn decrypt_auth(
        &self,
        repoauth: &str,
        _spec: &AppSpecification,
    ) -> CapabilityResult<RegistryAuth> {
        let (username, password) = repoauth.split_once(':').unwrap_or((repoauth, ""));
        Ok(RegistryAuth {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

pub struct FakeGeolocator {
    pub static_ip: AtomicBool,
}

#[async_trait]
impl Geolocator for FakeGeolocator {
    async fn node_geolocation(&self) -> CapabilityResult<NodeGeolocation> {
        Ok(NodeGeolocation::new("EU", "CZ", "Prague"))
    }

    async fn has_static_ip(&self) -> CapabilityResult<bool> {
        Ok(self.static_ip.load(Ordering::SeqCst))
    }
}

pub struct FakeHardware;

impl HardwareProbe for FakeHardware {
    fn cpu_cores(&self) -> f64 {
        8.0
    }

    fn ram_mb(&self) -> u64 {
        32000
    }

    fn ssd_gb(&self) -> u64 {
        500
    }
}

// ============================================================================
// Host shell
// ============================================================================

pub const DF_OUTPUT: &str = "\
Filesystem     Mounted on  Avail  1B-blocks
/dev/sda1      /            400GB      500GB
";

pub struct FakeHost {
    log: CallLog,
    crontab: Mutex<String>,
    df: Mutex<String>,
    /// `(program, argument fragment)` pairs whose commands fail
    failures: Mutex<Vec<(String, String)>>,
}

impl FakeHost {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            crontab: Mutex::new(String::new()),
            df: Mutex::new(DF_OUTPUT.to_string()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn set_df(&self, output: &str) {
        *self.df.lock().unwrap() = output.to_string();
    }

    /// Fail every `program` call with an argument containing `fragment`
    pub fn fail_command(&self, program: &str, fragment: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((program.to_string(), fragment.to_string()));
    }

    fn should_fail(&self, program: &str, args: &[String]) -> bool {
        self.failures
            .lock()
            .unwrap()
            .iter()
            .any(|(p, fragment)| p == program && args.iter().any(|a| a.contains(fragment.as_str())))
    }

    pub fn crontab(&self) -> String {
        self.crontab.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostSystem for FakeHost {
    async fn run(&self, program: &str, args: &[String]) -> CapabilityResult<String> {
        self.log.push(format!("host:{} {}", program, args.join(" ")));
        if self.should_fail(program, args) {
            return Err(CapabilityError::Host(format!("{} exited with status 1", program)));
        }
        if program == "df" {
            return Ok(self.df.lock().unwrap().clone());
        }
        Ok(String::new())
    }

    async fn read_crontab(&self) -> CapabilityResult<String> {
        Ok(self.crontab())
    }

    async fn write_crontab(&self, content: &str) -> CapabilityResult<()> {
        *self.crontab.lock().unwrap() = content.to_string();
        Ok(())
    }

    async fn directory_size(&self, _path: &str) -> CapabilityResult<u64> {
        Ok(4096)
    }
}

// ============================================================================
// Harness
// ============================================================================

/// An agent wired to fakes, with handles on every fake
pub struct TestNode {
    pub agent: Arc<NodeAgent>,
    pub log: CallLog,
    pub runtime: Arc<FakeRuntime>,
    pub network: Arc<FakeNetwork>,
    pub store: Arc<InMemoryStore>,
    pub host: Arc<FakeHost>,
    pub geo: Arc<FakeGeolocator>,
    pub firewall: Arc<FakeFirewall>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.apps.folder = "/var/lib/apphost-test".to_string();
    config.reserved.hdd = 50;
    config.probe.port_min = 42000;
    config.probe.port_max = 42999;
    config
}

impl TestNode {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let log = CallLog::default();
        let runtime = Arc::new(FakeRuntime::new(log.clone()));
        let network = Arc::new(FakeNetwork::new(log.clone()));
        let store = Arc::new(InMemoryStore::new());
        let host = Arc::new(FakeHost::new(log.clone()));
        let geo = Arc::new(FakeGeolocator {
            static_ip: AtomicBool::new(true),
        });
        let firewall = Arc::new(FakeFirewall::new(log.clone()));

        let caps = Capabilities {
            runtime: runtime.clone(),
            store: store.clone(),
            network: network.clone(),
            firewall: firewall.clone(),
            images: Arc::new(FakeImages),
            geolocator: geo.clone(),
            host: host.clone(),
            hardware: Arc::new(FakeHardware),
        };

        Self {
            agent: Arc::new(NodeAgent::new(config, caps)),
            log,
            runtime,
            network,
            store,
            host,
            geo,
            firewall,
        }
    }
}

// ============================================================================
// Specifications
// ============================================================================

pub fn single_spec(name: &str) -> AppSpecification {
    serde_json::from_value(serde_json::json!({
        "version": 3,
        "name": name,
        "owner": "1OwnerAddress",
        "repotag": format!("example/{}:latest", name),
        "ports": [31000],
        "containerPorts": [80],
        "containerData": "/data",
        "cpu": 0.5,
        "ram": 500,
        "hdd": 5
    }))
    .unwrap()
}

pub fn compose_spec(name: &str, components: &[&str]) -> AppSpecification {
    let compose: Vec<serde_json::Value> = components
        .iter()
        .enumerate()
        .map(|(i, component)| {
            serde_json::json!({
                "name": component,
                "description": format!("component {}", component),
                "repotag": format!("example/{}:latest", component),
                "ports": [31000 + i as u16],
                "containerPorts": [8000 + i as u16],
                "containerData": "/appdata",
                "cpu": 0.5,
                "ram": 500,
                "hdd": 5
            })
        })
        .collect();

    serde_json::from_value(serde_json::json!({
        "version": 4,
        "name": name,
        "owner": "1OwnerAddress",
        "compose": compose
    }))
    .unwrap()
}

/// Collect every progress line a sender produced
pub async fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<ProgressMessage>) -> Vec<ProgressMessage> {
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    lines
}
