//! Node configuration
//!
//! The agent reads a YAML file (default `~/.apphost/config.yaml`). Every section
//! has defaults, so a missing or empty file yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::{ResourceTriple, Tier};

/// Default API port of the agent
pub const DEFAULT_API_PORT: u16 = 16127;

/// Default container name prefix
pub const DEFAULT_CONTAINER_PREFIX: &str = "apphost";

/// Default config file location: ~/.apphost/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".apphost")
        .join("config.yaml")
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub reserved: ReservedConfig,
    pub tiers: TierCeilings,
    pub apps: AppsConfig,
    pub monitoring: MonitoringConfig,
    pub probe: ProbeConfig,
    pub enforcer: EnforcerConfig,
    pub peers: PeersConfig,
    pub geolocation: GeolocationConfig,
    pub images: ImagesConfig,
}

/// Identity and manual hardware overrides of this node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub tier: Tier,

    /// Manual CPU core count; 0 means detect
    pub cpu_cores: f64,

    /// Manual RAM in MB; 0 means detect
    pub ram_mb: u64,

    /// Manual SSD in GB; 0 means detect
    pub ssd_gb: u64,

    pub bind_addr: String,
    pub api_port: u16,

    /// Prefix of every container, volume and crontab key
    pub container_prefix: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tier: Tier::Cumulus,
            cpu_cores: 0.0,
            ram_mb: 0,
            ssd_gb: 0,
            bind_addr: "0.0.0.0".to_string(),
            api_port: DEFAULT_API_PORT,
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
        }
    }
}

/// Resources kept back for the host system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservedConfig {
    pub cpu: f64,
    pub ram: u64,
    pub hdd: u64,
}

impl Default for ReservedConfig {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            ram: 2000,
            hdd: 60,
        }
    }
}

impl ReservedConfig {
    pub fn as_triple(&self) -> ResourceTriple {
        ResourceTriple::new(self.cpu, self.ram, self.hdd)
    }
}

/// Maximum resources a node of each tier may sell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCeilings {
    pub cumulus: ResourceTriple,
    pub nimbus: ResourceTriple,
    pub stratus: ResourceTriple,
}

impl Default for TierCeilings {
    fn default() -> Self {
        Self {
            cumulus: ResourceTriple::new(4.0, 8000, 220),
            nimbus: ResourceTriple::new(8.0, 32000, 440),
            stratus: ResourceTriple::new(16.0, 64000, 880),
        }
    }
}

impl TierCeilings {
    pub fn ceiling(&self, tier: Tier) -> ResourceTriple {
        match tier {
            Tier::Cumulus => self.cumulus,
            Tier::Nimbus => self.nimbus,
            Tier::Stratus => self.stratus,
        }
    }
}

/// App installation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppsConfig {
    /// Folder holding app volumes and mountpoints (supports `~`)
    pub folder: String,

    /// Free space required on a filesystem beyond the requested volume, in GB
    pub volume_headroom_gb: u64,

    /// Instances kept network-wide when a spec does not declare `instances`
    pub min_instances: u32,

    /// Skip firewall and UPnP changes
    pub test_mode: bool,

    /// Map app ports through UPnP
    pub upnp: bool,
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            folder: "~/.apphost/appvolumes".to_string(),
            volume_headroom_gb: 2,
            min_instances: 3,
            test_mode: false,
            upnp: false,
        }
    }
}

impl AppsConfig {
    /// Apps folder with `~` and environment variables expanded
    pub fn folder_path(&self) -> PathBuf {
        let expanded = shellexpand::full(&self.folder)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| self.folder.clone());
        PathBuf::from(expanded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub sample_interval_secs: u64,
    pub throttle_interval_secs: u64,
    /// Minimum hour-window samples before the throttle controller acts
    pub throttle_min_samples: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 60,
            throttle_interval_secs: 15 * 60,
            throttle_min_samples: 5,
        }
    }
}

impl MonitoringConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_secs(self.throttle_interval_secs)
    }
}

/// Port-reachability probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub port_min: u16,
    pub port_max: u16,
    pub default_delay_secs: u64,
    pub transient_delay_secs: u64,
    pub failure_delay_secs: u64,
    pub dos_delay_secs: u64,
    pub unhealthy_delay_secs: u64,
    /// How long a peer that failed to answer is skipped
    pub peer_failure_ttl_secs: u64,
    /// Connect timeout used when checking a peer's ports
    pub connect_timeout_secs: u64,
    /// Spacing between DOS evictions
    pub eviction_interval_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port_min: 31000,
            port_max: 39999,
            default_delay_secs: 60 * 60,
            transient_delay_secs: 60,
            failure_delay_secs: 15,
            dos_delay_secs: 5 * 60,
            unhealthy_delay_secs: 4 * 60,
            peer_failure_ttl_secs: 10 * 60,
            connect_timeout_secs: 5,
            eviction_interval_secs: 60,
        }
    }
}

impl ProbeConfig {
    pub fn peer_failure_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_failure_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcerConfig {
    pub interval_secs: u64,
    /// Delay before the first cycle after start-up
    pub initial_delay_secs: u64,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
            initial_delay_secs: 10 * 60,
        }
    }
}

/// Peer transport settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// Base URLs of known peers (e.g., "http://203.0.113.7:16127")
    pub peers: Vec<String>,

    /// Secret used to sign peer requests
    pub node_key: String,

    /// Public address of this node; `None` until detected or configured
    pub public_ip: Option<String>,

    /// Collateral identity `txhash:txindex`
    pub collateral: Option<String>,

    /// Whether this node is confirmed by the network
    pub confirmed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    pub continent: String,
    pub country: String,
    pub region: String,
    pub static_ip: bool,
}

/// Image policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Repositories or repotag prefixes that may not be installed
    pub blocked: Vec<String>,
    /// Architectures the host can run
    pub architectures: Vec<String>,
    /// Largest accepted compressed image, in GB
    pub max_size_gb: u64,
    /// Inspect the registry manifest before pulling
    pub inspect_manifest: bool,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            blocked: Vec::new(),
            architectures: vec!["amd64".to_string()],
            max_size_gb: 16,
            inspect_manifest: true,
        }
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config =
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Serialize config to YAML string
pub fn serialize_config(config: &Config) -> Result<String, ConfigError> {
    serde_yaml::to_string(config).map_err(|e| ConfigError::ParseError(e.to_string()))
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.probe.port_min > config.probe.port_max {
        return Err(ConfigError::Invalid(format!(
            "probe port range {}-{} is empty",
            config.probe.port_min, config.probe.port_max
        )));
    }
    if config.apps.min_instances == 0 {
        return Err(ConfigError::Invalid(
            "apps.min_instances must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from the default location
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&default_config_path())
}

/// Load config from a specific path; a missing file yields defaults
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}
