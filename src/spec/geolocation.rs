//! Geolocation rule tokens
//!
//! Tokens come in two generations:
//! - legacy: `a<continent>` and `b<country>`
//! - current: `ac<continent>[_<country>[_<region>]]` (allow) and
//!   `a!c<continent>[_<country>[_<region>]]` (forbid), where `ALL` matches any value
//!   in allow rules.

use serde::{Deserialize, Serialize};

/// Wildcard accepted at any granularity of an allow rule
pub const WILDCARD: &str = "ALL";

/// Where this node is located
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeGeolocation {
    pub continent: String,
    pub country: String,
    pub region: String,
}

impl NodeGeolocation {
    pub fn new(
        continent: impl Into<String>,
        country: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            continent: continent.into(),
            country: country.into(),
            region: region.into(),
        }
    }
}

/// A continent, optionally narrowed to a country and region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoScope {
    pub continent: String,
    pub country: Option<String>,
    pub region: Option<String>,
}

impl GeoScope {
    fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(3, '_');
        let continent = parts.next().unwrap_or_default().to_string();
        let country = parts.next().filter(|s| !s.is_empty()).map(String::from);
        let region = parts.next().filter(|s| !s.is_empty()).map(String::from);
        Self {
            continent,
            country,
            region,
        }
    }

    /// Allow-rule match; `ALL` and missing parts match anything
    pub fn admits(&self, node: &NodeGeolocation) -> bool {
        let level = |rule: Option<&str>, actual: &str| match rule {
            None => true,
            Some(WILDCARD) => true,
            Some(v) => v == actual,
        };
        level(Some(&self.continent), &node.continent)
            && level(self.country.as_deref(), &node.country)
            && level(self.region.as_deref(), &node.region)
    }

    /// Forbid-rule match at the granularity the rule declares
    pub fn forbids(&self, node: &NodeGeolocation) -> bool {
        if self.continent != node.continent {
            return false;
        }
        match (&self.country, &self.region) {
            (None, _) => true,
            (Some(country), None) => *country == node.country,
            (Some(country), Some(region)) => *country == node.country && *region == node.region,
        }
    }
}

/// One parsed geolocation token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeolocationRule {
    LegacyContinent(String),
    LegacyCountry(String),
    Allow(GeoScope),
    Forbid(GeoScope),
}

impl GeolocationRule {
    /// Parse a token; unknown prefixes yield `None`
    pub fn parse(token: &str) -> Option<Self> {
        if let Some(rest) = token.strip_prefix("a!c") {
            Some(GeolocationRule::Forbid(GeoScope::parse(rest)))
        } else if let Some(rest) = token.strip_prefix("ac") {
            Some(GeolocationRule::Allow(GeoScope::parse(rest)))
        } else if let Some(rest) = token.strip_prefix('a') {
            Some(GeolocationRule::LegacyContinent(rest.to_string()))
        } else {
            token
                .strip_prefix('b')
                .map(|rest| GeolocationRule::LegacyCountry(rest.to_string()))
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            GeolocationRule::LegacyContinent(_) | GeolocationRule::LegacyCountry(_)
        )
    }
}

/// Parse all tokens, skipping unknown ones
pub fn parse_rules(tokens: &[String]) -> Vec<GeolocationRule> {
    tokens.iter().filter_map(|t| GeolocationRule::parse(t)).collect()
}
