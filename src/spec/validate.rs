//! Structural validation of app specifications
//!
//! Checks the shape of a spec before any resource arithmetic: version range,
//! names, compose layout and port lists. Hardware sanity checks live in
//! [`crate::admission::requirements`].

use std::collections::HashSet;

use regex::Regex;

use super::app::{AppSpecification, MAX_SPEC_VERSION};
use super::SpecError;

const NAME_PATTERN: &str = r"^[a-zA-Z0-9]+$";

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Check an app or component name against the allowed alphabet
pub fn is_valid_name(name: &str) -> bool {
    Regex::new(NAME_PATTERN)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Validate the structure of a specification
pub fn validate_shape(spec: &AppSpecification) -> Result<(), SpecError> {
    if spec.version == 0 || spec.version > MAX_SPEC_VERSION {
        return Err(SpecError::Invalid(format!(
            "Specifications version {} not supported",
            spec.version
        )));
    }

    if !is_valid_name(&spec.name) {
        return Err(SpecError::Invalid(format!(
            "Application name '{}' contains invalid characters",
            spec.name
        )));
    }

    if spec.version >= 4 {
        validate_compose(spec)
    } else {
        validate_single(spec)
    }
}

fn validate_single(spec: &AppSpecification) -> Result<(), SpecError> {
    if !spec.compose.is_empty() {
        return Err(SpecError::Invalid(format!(
            "Compose is not supported by specifications version {}",
            spec.version
        )));
    }

    if spec.repotag.as_deref().unwrap_or_default().is_empty() {
        return Err(SpecError::Invalid(format!(
            "Application {} is missing repotag",
            spec.name
        )));
    }

    if spec.version == 1 {
        if spec.port.is_some() != spec.container_port.is_some() {
            return Err(SpecError::Invalid(format!(
                "Application {} must declare port and containerPort together",
                spec.name
            )));
        }
    } else if spec.ports.len() != spec.container_ports.len() {
        return Err(SpecError::Invalid(format!(
            "Application {} ports do not match containerPorts",
            spec.name
        )));
    }

    Ok(())
}

fn validate_compose(spec: &AppSpecification) -> Result<(), SpecError> {
    if spec.compose.is_empty() {
        return Err(SpecError::Invalid(format!(
            "Application {} has no components",
            spec.name
        )));
    }

    let mut seen = HashSet::new();
    for component in &spec.compose {
        if !is_valid_name(&component.name) {
            return Err(SpecError::Invalid(format!(
                "Component name '{}' contains invalid characters",
                component.name
            )));
        }
        if !seen.insert(component.name.as_str()) {
            return Err(SpecError::Invalid(format!(
                "Component {} is declared more than once",
                component.name
            )));
        }
        if component.repotag.is_empty() {
            return Err(SpecError::Invalid(format!(
                "Component {} is missing repotag",
                component.name
            )));
        }
        if component.ports.len() != component.container_ports.len() {
            return Err(SpecError::Invalid(format!(
                "Component {} ports do not match containerPorts",
                component.name
            )));
        }
    }

    Ok(())
}
