use std::sync::Arc;

use serde::Serialize;

use crate::admission::ResourceLedger;
use crate::agent::NodeAgent;
use crate::capabilities::CapabilityResult;
use crate::spec::Tier;
use crate::state::{DosState, NodeSpecs, ProgressFlags};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<NodeAgent>,
}

/// Snapshot served by `GET /v1/status`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub hostname: String,
    pub tier: Tier,
    pub specs: NodeSpecs,
    pub locked: ResourceLedger,
    pub dos: DosState,
    pub progress: ProgressFlags,
    pub monitored: Vec<String>,
}

impl AppState {
    pub fn new(agent: Arc<NodeAgent>) -> Self {
        Self { agent }
    }

    pub async fn node_status(&self) -> CapabilityResult<NodeStatus> {
        let agent = &self.agent;
        let apps = agent.caps.store.installed_apps().await?;
        Ok(NodeStatus {
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_default(),
            tier: agent.config.node.tier,
            specs: agent.lifecycle.admission().node_specs(),
            locked: ResourceLedger::from_apps(&apps, agent.config.node.tier, None),
            dos: agent.state.dos(),
            progress: agent.state.progress.flags(),
            monitored: agent.monitor.monitored(),
        })
    }
}
