//! Instance count enforcement
//!
//! When more nodes advertise an app than it asked for, every node ranks the
//! advertised locations the same way and only the node ranked last removes its
//! copy. No coordination between nodes is needed.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capabilities::{strip_port, Capabilities, CapabilityResult, RunLocation};
use crate::config::Config;
use crate::lifecycle::{Lifecycle, RemoveOptions};
use crate::progress::ProgressSender;
use crate::scheduler::{spawn_scheduled, Schedule, ScheduledHandle};
use crate::state::NodeState;

/// Newest first, then IP descending; undated locations last
pub fn compare_locations(a: &RunLocation, b: &RunLocation) -> Ordering {
    let by_date = match (&a.running_since, &b.running_since) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_date.then_with(|| b.host().cmp(a.host()))
}

pub fn rank_locations(locations: &mut [RunLocation]) {
    locations.sort_by(compare_locations);
}

/// Whether the node at `own_ip` must drop its copy
pub fn should_evict(locations: &[RunLocation], allowed: usize, own_ip: &str) -> bool {
    if locations.len() <= allowed {
        return false;
    }
    let mut ranked = locations.to_vec();
    rank_locations(&mut ranked);
    ranked
        .last()
        .map(|last| last.host() == strip_port(own_ip))
        .unwrap_or(false)
}

/// Number of locations advertised from `own_ip`
pub fn own_location_count(locations: &[RunLocation], own_ip: &str) -> usize {
    let own = strip_port(own_ip);
    locations.iter().filter(|l| l.host() == own).count()
}

pub struct InstanceEnforcer {
    config: Arc<Config>,
    state: Arc<NodeState>,
    caps: Capabilities,
    lifecycle: Lifecycle,
}

impl InstanceEnforcer {
    pub fn new(
        config: Arc<Config>,
        state: Arc<NodeState>,
        caps: Capabilities,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            config,
            state,
            caps,
            lifecycle,
        }
    }

    /// One enforcement pass; returns the apps removed
    pub async fn run_once(&self) -> CapabilityResult<Vec<String>> {
        if !self.caps.network.is_synced().await? {
            debug!("Instance enforcement skipped, node not synced");
            return Ok(Vec::new());
        }
        let Some(own_ip) = self.caps.network.public_ip().await? else {
            debug!("Instance enforcement skipped, public IP unknown");
            return Ok(Vec::new());
        };

        let mut removed = Vec::new();
        let mut duplicate = None;
        for app in self.caps.store.installed_apps().await? {
            let locations = self.caps.store.run_locations(&app.name).await?;

            if own_location_count(&locations, &own_ip) > 1 && duplicate.is_none() {
                duplicate = Some(format!(
                    "Application {} is running more than once on {}",
                    app.name,
                    strip_port(&own_ip)
                ));
            }

            let allowed = app
                .declared_instances()
                .unwrap_or(self.config.apps.min_instances) as usize;
            if !should_evict(&locations, allowed, &own_ip) {
                continue;
            }

            info!(
                "Application {} runs on {} nodes, {} allowed; removing local copy",
                app.name,
                locations.len(),
                allowed
            );
            match self
                .lifecycle
                .remove(&app.name, RemoveOptions::background(), &ProgressSender::detached())
                .await
            {
                Ok(()) => removed.push(app.name.clone()),
                Err(e) => warn!("Removal of surplus {} failed: {}", app.name, e),
            }
        }

        if let Some(message) = &duplicate {
            warn!("{}", message);
        }
        self.state
            .update_dos(|dos| dos.duplicate_message = duplicate);
        Ok(removed)
    }

    pub fn spawn(self: &Arc<Self>) -> ScheduledHandle {
        let enforcer = self.clone();
        let initial = Duration::from_secs(self.config.enforcer.initial_delay_secs);
        let interval = Duration::from_secs(self.config.enforcer.interval_secs);
        spawn_scheduled("instance enforcer", initial, move || {
            let enforcer = enforcer.clone();
            async move {
                if let Err(e) = enforcer.run_once().await {
                    warn!("Instance enforcement failed: {}", e);
                }
                Schedule::After(interval)
            }
        })
    }
}
