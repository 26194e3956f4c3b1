//! HTTP peer transport
//!
//! Peers are other agents reachable at a base URL. Requests between them are
//! signed with an HMAC-SHA256 over a canonical message using the shared node key.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use super::{CapabilityError, CapabilityResult, PeerNetwork, PortCheckRequest};
use crate::config::PeersConfig;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed peer request, in seconds
pub const ALLOWED_WINDOW: i64 = 300;

/// Sign a message with the node key (hex-encoded HMAC-SHA256)
pub fn sign_message(message: &str, secret: &str) -> String {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(message.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Verify a hex signature produced by [`sign_message`]
pub fn verify_message(message: &str, signature: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(message.as_bytes());
            mac.verify_slice(&expected).is_ok()
        }
        Err(_) => false,
    }
}

pub fn is_timestamp_in_valid_range(timestamp: i64) -> bool {
    (Utc::now().timestamp() - timestamp).abs() <= ALLOWED_WINDOW
}

/// Kind of app announcement sent to peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastKind {
    Running,
    Removed,
    Error,
}

/// App announcement exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppBroadcast {
    pub kind: BroadcastKind,
    pub app: String,
    pub ip: String,
    #[serde(default)]
    pub running_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
    pub timestamp: i64,
    pub signature: String,
}

impl AppBroadcast {
    /// Canonical message covered by the signature; `running_since` enters
    /// as epoch milliseconds, empty when absent
    pub fn message_for(
        kind: BroadcastKind,
        app: &str,
        ip: &str,
        running_since: Option<DateTime<Utc>>,
        timestamp: i64,
    ) -> String {
        let since = running_since
            .map(|t| t.timestamp_millis().to_string())
            .unwrap_or_default();
        format!("{:?}|{}|{}|{}|{}", kind, app, ip, since, timestamp)
    }

    pub fn signed_message(&self) -> String {
        Self::message_for(
            self.kind,
            &self.app,
            &self.ip,
            self.running_since,
            self.timestamp,
        )
    }
}

/// Answer of a peer to a port check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCheckResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Peer network over plain HTTP
pub struct HttpPeerNetwork {
    config: PeersConfig,
    client: Client,
}

impl HttpPeerNetwork {
    pub fn new(config: PeersConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    async fn broadcast(
        &self,
        kind: BroadcastKind,
        app: &str,
        message: Option<&str>,
    ) -> CapabilityResult<()> {
        let Some(ip) = self.config.public_ip.clone() else {
            debug!("No public address, skipping {:?} broadcast of {}", kind, app);
            return Ok(());
        };
        let timestamp = Utc::now().timestamp();
        let running_since = (kind == BroadcastKind::Running).then(Utc::now);
        let signature = self.sign(&AppBroadcast::message_for(
            kind,
            app,
            &ip,
            running_since,
            timestamp,
        ));
        let payload = AppBroadcast {
            kind,
            app: app.to_string(),
            ip,
            running_since,
            message: message.map(String::from),
            timestamp,
            signature,
        };

        for peer in &self.config.peers {
            let url = format!("{}/v1/broadcast", peer.trim_end_matches('/'));
            match self.client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!("Peer {} rejected broadcast: {}", peer, resp.status()),
                Err(e) => warn!("Broadcast to {} failed: {}", peer, e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PeerNetwork for HttpPeerNetwork {
    async fn is_synced(&self) -> CapabilityResult<bool> {
        Ok(!self.config.peers.is_empty())
    }

    async fn is_confirmed(&self) -> CapabilityResult<bool> {
        Ok(self.config.confirmed)
    }

    async fn public_ip(&self) -> CapabilityResult<Option<String>> {
        Ok(self.config.public_ip.clone())
    }

    fn collateral(&self) -> Option<String> {
        self.config.collateral.clone()
    }

    fn sign(&self, message: &str) -> String {
        sign_message(message, &self.config.node_key)
    }

    fn verify(&self, message: &str, signature: &str) -> bool {
        verify_message(message, signature, &self.config.node_key)
    }

    async fn random_peer(&self, exclude: &[String]) -> CapabilityResult<Option<String>> {
        let candidates: Vec<&String> = self
            .config
            .peers
            .iter()
            .filter(|p| !exclude.contains(p))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        let idx = rand::rng().random_range(0..candidates.len());
        Ok(Some(candidates[idx].clone()))
    }

    async fn request_port_check(
        &self,
        peer: &str,
        request: &PortCheckRequest,
    ) -> CapabilityResult<bool> {
        let url = format!("{}/v1/ports/check", peer.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| CapabilityError::Network(format!("{}: {}", peer, e)))?;

        if !response.status().is_success() {
            return Err(CapabilityError::Network(format!(
                "{} answered {}",
                peer,
                response.status()
            )));
        }

        let body: PortCheckResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Network(format!("{}: {}", peer, e)))?;
        Ok(body.status == "success")
    }

    async fn broadcast_running(&self, app: &str) -> CapabilityResult<()> {
        self.broadcast(BroadcastKind::Running, app, None).await
    }

    async fn broadcast_removed(&self, app: &str) -> CapabilityResult<()> {
        self.broadcast(BroadcastKind::Removed, app, None).await
    }

    async fn broadcast_error(&self, app: &str, message: &str) -> CapabilityResult<()> {
        self.broadcast(BroadcastKind::Error, app, Some(message)).await
    }
}
