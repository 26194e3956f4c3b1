//! Geolocation from node configuration

use async_trait::async_trait;

use super::{CapabilityError, CapabilityResult, Geolocator};
use crate::config::GeolocationConfig;
use crate::spec::NodeGeolocation;

#[derive(Debug, Clone)]
pub struct StaticGeolocator {
    config: GeolocationConfig,
}

impl StaticGeolocator {
    pub fn new(config: GeolocationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Geolocator for StaticGeolocator {
    async fn node_geolocation(&self) -> CapabilityResult<NodeGeolocation> {
        if self.config.continent.is_empty() || self.config.country.is_empty() {
            return Err(CapabilityError::Geolocation(
                "node geolocation is not configured".to_string(),
            ));
        }
        Ok(NodeGeolocation::new(
            &self.config.continent,
            &self.config.country,
            &self.config.region,
        ))
    }

    async fn has_static_ip(&self) -> CapabilityResult<bool> {
        Ok(self.config.static_ip)
    }
}
