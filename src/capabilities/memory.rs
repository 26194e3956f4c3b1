//! In-process app store
//!
//! Keeps installed and network-wide specifications plus advertised run
//! locations in concurrent maps. Used by the binary when no external document
//! store is configured, and by tests.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AppStore, CapabilityResult, RunLocation};
use crate::spec::AppSpecification;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    installed: DashMap<String, AppSpecification>,
    global: DashMap<String, AppSpecification>,
    locations: DashMap<String, Vec<RunLocation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a specification network-wide
    pub fn add_global_app(&self, spec: AppSpecification) {
        self.global.insert(spec.name.clone(), spec);
    }
}

#[async_trait]
impl AppStore for InMemoryStore {
    async fn installed_apps(&self) -> CapabilityResult<Vec<AppSpecification>> {
        let mut apps: Vec<AppSpecification> =
            self.installed.iter().map(|e| e.value().clone()).collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    async fn installed_app(&self, name: &str) -> CapabilityResult<Option<AppSpecification>> {
        Ok(self.installed.get(name).map(|e| e.value().clone()))
    }

    async fn insert_app(&self, spec: &AppSpecification) -> CapabilityResult<()> {
        self.installed.insert(spec.name.clone(), spec.clone());
        self.global
            .entry(spec.name.clone())
            .or_insert_with(|| spec.clone());
        Ok(())
    }

    async fn remove_app(&self, name: &str) -> CapabilityResult<()> {
        self.installed.remove(name);
        Ok(())
    }

    async fn global_app(&self, name: &str) -> CapabilityResult<Option<AppSpecification>> {
        Ok(self.global.get(name).map(|e| e.value().clone()))
    }

    async fn run_locations(&self, name: &str) -> CapabilityResult<Vec<RunLocation>> {
        Ok(self
            .locations
            .get(name)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn upsert_run_location(&self, location: &RunLocation) -> CapabilityResult<()> {
        let mut entry = self.locations.entry(location.name.clone()).or_default();
        entry.retain(|l| l.host() != location.host());
        entry.push(location.clone());
        Ok(())
    }

    async fn remove_run_location(&self, name: &str, ip: &str) -> CapabilityResult<()> {
        if let Some(mut entry) = self.locations.get_mut(name) {
            entry.retain(|l| l.host() != super::strip_port(ip));
        }
        Ok(())
    }
}
