//! App specification data model
//!
//! Versioned app descriptors, tiered resource declarations and geolocation rule
//! tokens, plus structural validation.

mod app;
mod geolocation;
mod resources;
mod validate;

pub use app::{
    AppComponent, AppSpecification, ComponentSpecification, ContainerData, MAX_SPEC_VERSION,
};
pub use geolocation::{parse_rules, GeoScope, GeolocationRule, NodeGeolocation, WILDCARD};
pub use resources::{to_decicores, ResourceTriple, Resources, Tier, TierOverride};
pub use validate::{is_valid_name, validate_shape};

use thiserror::Error;

/// Errors raised while parsing or validating a specification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("{0}")]
    Invalid(String),

    #[error("Failed to parse specification: {0}")]
    ParseError(String),
}

/// Parse a JSON specification and validate its shape
pub fn parse_specification(content: &str) -> Result<AppSpecification, SpecError> {
    let spec: AppSpecification =
        serde_json::from_str(content).map_err(|e| SpecError::ParseError(e.to_string()))?;
    validate_shape(&spec)?;
    Ok(spec)
}
