//! Removal of local apps while the node is declared unreachable

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::capabilities::AppStore;
use crate::lifecycle::{Lifecycle, RemoveOptions};
use crate::progress::ProgressSender;
use crate::scheduler::{spawn_scheduled, Schedule, ScheduledHandle};
use crate::state::NodeState;

/// Force-removes one installed app per run while the DOS message is set
pub struct DosEvictor {
    state: Arc<NodeState>,
    store: Arc<dyn AppStore>,
    lifecycle: Lifecycle,
    interval: Duration,
}

impl DosEvictor {
    pub fn new(
        state: Arc<NodeState>,
        store: Arc<dyn AppStore>,
        lifecycle: Lifecycle,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            store,
            lifecycle,
            interval,
        }
    }

    /// Evict at most one app; returns its name
    pub async fn run_once(&self) -> Option<String> {
        let message = self.state.dos().message?;

        let apps = match self.store.installed_apps().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!("Installed apps unavailable for eviction: {}", e);
                return None;
            }
        };
        let app = apps.into_iter().next()?;

        warn!("Node unreachable ({}), removing {}", message, app.name);
        match self
            .lifecycle
            .remove(&app.name, RemoveOptions::background(), &ProgressSender::detached())
            .await
        {
            Ok(()) => {
                info!("Application {} evicted", app.name);
                Some(app.name)
            }
            Err(e) => {
                warn!("Eviction of {} failed: {}", app.name, e);
                None
            }
        }
    }

    pub fn spawn(self: &Arc<Self>) -> ScheduledHandle {
        let evictor = self.clone();
        let interval = self.interval;
        spawn_scheduled("dos evictor", interval, move || {
            let evictor = evictor.clone();
            async move {
                evictor.run_once().await;
                Schedule::After(interval)
            }
        })
    }
}
