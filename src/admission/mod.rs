//! Resource admission control
//!
//! Decides whether an app may be installed on this node: hardware capacity,
//! geolocation, node affinity and static IP. The verdict logic lives in pure
//! functions ([`requirements`], [`placement`]); [`AdmissionController`] only
//! gathers the node facts they need.

pub mod placement;
pub mod requirements;

pub use placement::{evaluate_geolocation, evaluate_node_affinity};
pub use requirements::{
    check_hardware, compute_requirements, validate_compose_hw, validate_declared_hw,
    ResourceLedger,
};

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::capabilities::{CapabilityError, Capabilities};
use crate::config::Config;
use crate::spec::AppSpecification;
use crate::state::{NodeSpecs, NodeState};

/// Reasons an app is refused; surfaced verbatim to the caller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("Insufficient space on node to spawn an application")]
    InsufficientSpace,

    #[error("Insufficient CPU power on node to spawn an application")]
    InsufficientCpu,

    #[error("Insufficient RAM on node to spawn an application")]
    InsufficientRam,

    #[error("{0}")]
    Geolocation(String),

    #[error("Application {0} is not allowed to run on this node")]
    NotAllowed(String),

    #[error("Application {0} requires static IP address to run")]
    StaticIpRequired(String),

    #[error("{0}")]
    InvalidHardware(String),

    #[error(transparent)]
    Collaborator(#[from] CapabilityError),
}

/// Gathers node facts and applies the admission rules
#[derive(Clone)]
pub struct AdmissionController {
    config: Arc<Config>,
    state: Arc<NodeState>,
    caps: Capabilities,
}

impl AdmissionController {
    pub fn new(config: Arc<Config>, state: Arc<NodeState>, caps: Capabilities) -> Self {
        Self {
            config,
            state,
            caps,
        }
    }

    pub fn node_specs(&self) -> NodeSpecs {
        self.state
            .specs
            .resolve(&self.config.node, self.caps.hardware.as_ref())
    }

    /// Resources locked by installed apps other than `exclude`
    pub async fn ledger(&self, exclude: Option<&str>) -> Result<ResourceLedger, AdmissionError> {
        let apps = self.caps.store.installed_apps().await?;
        Ok(ResourceLedger::from_apps(
            &apps,
            self.config.node.tier,
            exclude,
        ))
    }

    /// Sanity-check the declared hardware fields of a spec
    pub fn validate_hardware_declaration(
        &self,
        spec: &AppSpecification,
    ) -> Result<(), AdmissionError> {
        let reserved = self.config.reserved.as_triple();
        if spec.version >= 4 {
            validate_compose_hw(spec, &self.config.tiers, reserved)
        } else {
            validate_declared_hw(spec, &self.config.tiers, reserved)
        }
    }

    pub async fn admit_hardware(&self, spec: &AppSpecification) -> Result<(), AdmissionError> {
        let required = compute_requirements(spec, self.config.node.tier);
        let ledger = self.ledger(Some(&spec.name)).await?;
        let node = self.node_specs();
        debug!(
            "Admission of {}: required={:?} node={:?} locked={:?}",
            spec.name, required, node, ledger
        );
        check_hardware(required, node, self.config.reserved.as_triple(), ledger)
    }

    pub async fn admit_geolocation(&self, spec: &AppSpecification) -> Result<(), AdmissionError> {
        if spec.geolocation_tokens().is_empty() {
            return Ok(());
        }
        let node = self.caps.geolocator.node_geolocation().await.map_err(|e| {
            AdmissionError::Geolocation(format!(
                "Node geolocation is unknown, application {} cannot be installed: {}",
                spec.name, e
            ))
        })?;
        evaluate_geolocation(spec, &node)
    }

    pub async fn admit_node_affinity(&self, spec: &AppSpecification) -> Result<(), AdmissionError> {
        if spec.node_allow_list().is_empty() {
            return Ok(());
        }
        let ip = self.caps.network.public_ip().await?;
        let collateral = self.caps.network.collateral();
        evaluate_node_affinity(spec, ip.as_deref(), collateral.as_deref())
    }

    pub async fn admit_static_ip(&self, spec: &AppSpecification) -> Result<(), AdmissionError> {
        if !spec.requires_static_ip() {
            return Ok(());
        }
        if self.caps.geolocator.has_static_ip().await? {
            Ok(())
        } else {
            Err(AdmissionError::StaticIpRequired(spec.name.clone()))
        }
    }

    /// Run every check in order; the first failure wins
    pub async fn admit(&self, spec: &AppSpecification) -> Result<(), AdmissionError> {
        self.validate_hardware_declaration(spec)?;
        self.admit_hardware(spec).await?;
        self.admit_geolocation(spec).await?;
        self.admit_node_affinity(spec).await?;
        self.admit_static_ip(spec).await?;
        info!("Application {} admitted on this node", spec.name);
        Ok(())
    }
}
