//! Geolocation and node-affinity verdicts
//!
//! Both are pure functions of the spec and the node's facts, so every node
//! reaches the same verdict for the same inputs.

use super::AdmissionError;
use crate::capabilities::strip_port;
use crate::spec::{parse_rules, AppSpecification, GeoScope, GeolocationRule, NodeGeolocation};

/// Shortest address counted as a real detected IP
const MIN_IP_LEN: usize = 6;

fn describe(scope: &GeoScope) -> String {
    let mut parts = vec![scope.continent.as_str()];
    parts.extend(scope.country.as_deref());
    parts.extend(scope.region.as_deref());
    parts.join("_")
}

/// Evaluate the geolocation tokens of `spec` for a node at `node`.
///
/// Legacy `a`/`b` tokens are honored only when the spec has no `ac`/`a!c` token.
/// Forbidden scopes are checked before allowed ones.
pub fn evaluate_geolocation(
    spec: &AppSpecification,
    node: &NodeGeolocation,
) -> Result<(), AdmissionError> {
    let rules = parse_rules(spec.geolocation_tokens());
    if rules.is_empty() {
        return Ok(());
    }

    if rules.iter().all(GeolocationRule::is_legacy) {
        return evaluate_legacy(spec, &rules, node);
    }

    for rule in &rules {
        if let GeolocationRule::Forbid(scope) = rule {
            if scope.forbids(node) {
                return Err(AdmissionError::Geolocation(format!(
                    "Application {} is not allowed to run in {}",
                    spec.name,
                    describe(scope)
                )));
            }
        }
    }

    let allowed: Vec<&GeoScope> = rules
        .iter()
        .filter_map(|r| match r {
            GeolocationRule::Allow(scope) => Some(scope),
            _ => None,
        })
        .collect();
    if !allowed.is_empty() && !allowed.iter().any(|scope| scope.admits(node)) {
        return Err(AdmissionError::Geolocation(format!(
            "Application {} geolocation requirements are not met by this node ({}_{}_{})",
            spec.name, node.continent, node.country, node.region
        )));
    }

    Ok(())
}

fn evaluate_legacy(
    spec: &AppSpecification,
    rules: &[GeolocationRule],
    node: &NodeGeolocation,
) -> Result<(), AdmissionError> {
    let continents: Vec<&str> = rules
        .iter()
        .filter_map(|r| match r {
            GeolocationRule::LegacyContinent(c) => Some(c.as_str()),
            _ => None,
        })
        .collect();
    let countries: Vec<&str> = rules
        .iter()
        .filter_map(|r| match r {
            GeolocationRule::LegacyCountry(c) => Some(c.as_str()),
            _ => None,
        })
        .collect();

    if !continents.is_empty() && !continents.contains(&node.continent.as_str()) {
        return Err(AdmissionError::Geolocation(format!(
            "Application {} continent geolocation requirement is not met by this node",
            spec.name
        )));
    }
    if !countries.is_empty() && !countries.contains(&node.country.as_str()) {
        return Err(AdmissionError::Geolocation(format!(
            "Application {} country geolocation requirement is not met by this node",
            spec.name
        )));
    }
    Ok(())
}

/// Check the version 7 node allow-list against this node's IP and collateral
pub fn evaluate_node_affinity(
    spec: &AppSpecification,
    public_ip: Option<&str>,
    collateral: Option<&str>,
) -> Result<(), AdmissionError> {
    let allowed = spec.node_allow_list();
    if allowed.is_empty() {
        return Ok(());
    }

    let ip = public_ip
        .map(strip_port)
        .filter(|ip| ip.len() >= MIN_IP_LEN);
    if let Some(ip) = ip {
        if allowed.iter().any(|entry| strip_port(entry) == ip) {
            return Ok(());
        }
    }

    if let Some(collateral) = collateral {
        if allowed.iter().any(|entry| entry == collateral) {
            return Ok(());
        }
    }

    Err(AdmissionError::NotAllowed(spec.name.clone()))
}
