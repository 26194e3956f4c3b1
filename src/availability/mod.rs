//! Self-assessment of external reachability
//!
//! The probe periodically opens a port, asks a random peer to connect back to
//! it and feeds the outcome into [`PortSweep`]. A node that keeps failing
//! declares itself unreachable through the DOS message, which
//! [`DosEvictor`] acts upon.

pub mod eviction;
pub mod ports;

pub use eviction::DosEvictor;
pub use ports::{PortSweep, ProbeOutcome, Verdict};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::capabilities::{Capabilities, CapabilityError, PortCheckRequest};
use crate::config::{Config, ProbeConfig};
use crate::scheduler::{spawn_scheduled, Schedule, ScheduledHandle};
use crate::state::NodeState;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("No peer available for a port check")]
    NoPeer,

    #[error("Port {0} could not be opened: {1}")]
    Listen(u16, std::io::Error),
}

/// Why a run ended before a peer was asked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Mount or duplicate-instance condition reported
    ExternalCondition,
    NotSynced,
    NotConfirmed,
    NoPublicIp,
    /// Banned, operator-blocked or used by an installed app
    PortUnavailable,
}

/// Delay before the next run for each kind of result
pub fn skip_delay(config: &ProbeConfig, skip: Skip) -> Duration {
    let secs = match skip {
        Skip::ExternalCondition => config.dos_delay_secs,
        Skip::NotSynced | Skip::NoPublicIp => config.default_delay_secs,
        Skip::NotConfirmed => config.unhealthy_delay_secs,
        Skip::PortUnavailable => config.failure_delay_secs,
    };
    Duration::from_secs(secs)
}

pub fn verdict_delay(config: &ProbeConfig, verdict: Verdict) -> Duration {
    let secs = match verdict {
        Verdict::Retry => config.failure_delay_secs,
        Verdict::Healthy => config.default_delay_secs,
        Verdict::Dos => config.dos_delay_secs,
    };
    Duration::from_secs(secs)
}

/// Try to connect to every port of `ip` within `timeout` each
pub async fn connect_back(ip: &str, ports: &[u16], timeout: Duration) -> bool {
    for port in ports {
        let addr = format!("{}:{}", ip, port);
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => debug!("Port check of {} succeeded", addr),
            Ok(Err(e)) => {
                debug!("Port check of {} failed: {}", addr, e);
                return false;
            }
            Err(_) => {
                debug!("Port check of {} timed out", addr);
                return false;
            }
        }
    }
    true
}

/// Peers that recently failed to answer
#[derive(Debug, Default)]
struct PeerFailures {
    failed: HashMap<String, Instant>,
}

impl PeerFailures {
    fn record(&mut self, peer: &str) {
        self.failed.insert(peer.to_string(), Instant::now());
    }

    fn active(&mut self, ttl: Duration) -> Vec<String> {
        self.failed.retain(|_, at| at.elapsed() < ttl);
        self.failed.keys().cloned().collect()
    }
}

pub struct AvailabilityProbe {
    config: Arc<Config>,
    state: Arc<NodeState>,
    caps: Capabilities,
    sweep: Mutex<PortSweep>,
    peer_failures: Mutex<PeerFailures>,
}

impl AvailabilityProbe {
    pub fn new(config: Arc<Config>, state: Arc<NodeState>, caps: Capabilities) -> Self {
        let sweep = PortSweep::new(config.probe.port_min, config.probe.port_max);
        Self {
            config,
            state,
            caps,
            sweep: Mutex::new(sweep),
            peer_failures: Mutex::new(PeerFailures::default()),
        }
    }

    /// Copy of the current sweep state
    pub fn sweep(&self) -> PortSweep {
        self.sweep.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run one probe and return the delay before the next
    pub async fn run_once(&self) -> Duration {
        let probe = &self.config.probe;
        match self.probe().await {
            Ok(Ok(verdict)) => verdict_delay(probe, verdict),
            Ok(Err(skip)) => {
                debug!("Availability probe skipped: {:?}", skip);
                skip_delay(probe, skip)
            }
            Err(e) => {
                warn!("Availability probe failed: {}", e);
                Duration::from_secs(probe.transient_delay_secs)
            }
        }
    }

    async fn probe(&self) -> Result<Result<Verdict, Skip>, ProbeError> {
        let condition = self.state.dos().external_condition().map(str::to_string);
        if let Some(condition) = condition {
            warn!("Node unhealthy: {}", condition);
            self.state.update_dos(|dos| dos.message = Some(condition));
            return Ok(Err(Skip::ExternalCondition));
        }

        let network = &self.caps.network;
        if !network.is_synced().await? {
            return Ok(Err(Skip::NotSynced));
        }
        if !network.is_confirmed().await? {
            return Ok(Err(Skip::NotConfirmed));
        }
        let Some(ip) = network.public_ip().await? else {
            return Ok(Err(Skip::NoPublicIp));
        };
        let ip = crate::capabilities::strip_port(&ip).to_string();

        let port = self
            .sweep
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .choose_port();
        if !self.port_available(port).await? {
            debug!("Port {} unavailable for probing", port);
            return Ok(Err(self.skip_port(port)));
        }

        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                debug!("Port {} already in use", port);
                return Ok(Err(self.skip_port(port)));
            }
            Err(e) => return Err(ProbeError::Listen(port, e)),
        };

        self.open_port(port).await;
        let outcome = self.ask_peer(&ip, port).await;
        drop(listener);
        self.close_port(port).await;

        let outcome = outcome?;
        let verdict = {
            let mut sweep = self.sweep.lock().unwrap_or_else(|e| e.into_inner());
            self.state
                .update_dos(|dos| sweep.apply(port, outcome, dos))
        };
        match verdict {
            Verdict::Dos => warn!("Node declared unreachable after probing port {}", port),
            Verdict::Healthy => info!("Port {} reachable, node healthy", port),
            Verdict::Retry => debug!("Port {} outcome {:?}", port, outcome),
        }
        Ok(Ok(verdict))
    }

    fn skip_port(&self, port: u16) -> Skip {
        self.sweep
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .skip(port);
        Skip::PortUnavailable
    }

    async fn port_available(&self, port: u16) -> Result<bool, ProbeError> {
        let firewall = &self.caps.firewall;
        if firewall.is_banned(port) || firewall.is_user_blocked(port) {
            return Ok(false);
        }
        let apps = self.caps.store.installed_apps().await?;
        Ok(!apps.iter().any(|app| app.all_ports().contains(&port)))
    }

    async fn open_port(&self, port: u16) {
        if self.config.apps.test_mode {
            return;
        }
        if let Err(e) = self.caps.firewall.allow_port(port).await {
            warn!("Probe port {} not opened: {}", port, e);
        }
        if self.config.apps.upnp {
            if let Err(e) = self.caps.firewall.map_upnp(port, "apphost probe").await {
                warn!("Probe port {} not mapped: {}", port, e);
            }
        }
    }

    async fn close_port(&self, port: u16) {
        if self.config.apps.test_mode {
            return;
        }
        if let Err(e) = self.caps.firewall.deny_port(port).await {
            warn!("Probe port {} not closed: {}", port, e);
        }
        if self.config.apps.upnp {
            if let Err(e) = self.caps.firewall.unmap_upnp(port).await {
                warn!("Probe port {} not unmapped: {}", port, e);
            }
        }
    }

    async fn ask_peer(&self, ip: &str, port: u16) -> Result<ProbeOutcome, ProbeError> {
        let network = &self.caps.network;
        let exclude = self
            .peer_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active(self.config.probe.peer_failure_ttl());
        let peer = network
            .random_peer(&exclude)
            .await?
            .ok_or(ProbeError::NoPeer)?;

        let request = PortCheckRequest::signed(ip, vec![port], network.as_ref());
        match network.request_port_check(&peer, &request).await {
            Ok(true) => Ok(ProbeOutcome::Reachable),
            Ok(false) => Ok(ProbeOutcome::Unreachable),
            Err(e) => {
                self.peer_failures
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(&peer);
                Err(e.into())
            }
        }
    }

    pub fn spawn(self: &Arc<Self>) -> ScheduledHandle {
        let probe = self.clone();
        let initial = Duration::from_secs(self.config.probe.transient_delay_secs);
        spawn_scheduled("availability probe", initial, move || {
            let probe = probe.clone();
            async move { Schedule::After(probe.run_once().await) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_mapping() {
        let config = ProbeConfig::default();
        assert_eq!(verdict_delay(&config, Verdict::Retry), Duration::from_secs(15));
        assert_eq!(verdict_delay(&config, Verdict::Healthy), Duration::from_secs(3600));
        assert_eq!(verdict_delay(&config, Verdict::Dos), Duration::from_secs(300));
        assert_eq!(
            skip_delay(&config, Skip::NotConfirmed),
            Duration::from_secs(240)
        );
        assert_eq!(
            skip_delay(&config, Skip::ExternalCondition),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_peer_failures_expire() {
        let mut failures = PeerFailures::default();
        failures.record("http://peer-a");
        assert_eq!(failures.active(Duration::from_secs(600)), vec!["http://peer-a"]);
        assert!(failures.active(Duration::ZERO).is_empty());
    }

    #[tokio::test]
    async fn test_connect_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(connect_back("127.0.0.1", &[port], Duration::from_secs(2)).await);

        drop(listener);
        assert!(!connect_back("127.0.0.1", &[port], Duration::from_secs(2)).await);
    }
}
