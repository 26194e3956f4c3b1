use tracing::{debug, error, info, warn};

use super::{InstallMode, Lifecycle, LifecycleError, RemoveOptions};
use crate::capabilities::CapabilityResult;
use crate::progress::{ProgressMessage, ProgressSender};
use crate::spec::{AppComponent, AppSpecification};

fn log_step(app_id: &str, step: &str, result: CapabilityResult<()>) {
    match result {
        Ok(()) => debug!("{}: {} done", app_id, step),
        Err(e) => warn!("{}: {} failed: {}", app_id, step, e),
    }
}

impl Lifecycle {
    pub async fn remove_hard(
        &self,
        name: &str,
        force: bool,
        end_response: bool,
        notify_peers: bool,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        let options = RemoveOptions {
            mode: InstallMode::Hard,
            force,
            end_response,
            notify_peers,
        };
        self.remove(name, options, progress).await
    }

    pub async fn remove_soft(
        &self,
        name: &str,
        force: bool,
        end_response: bool,
        notify_peers: bool,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        let options = RemoveOptions {
            mode: InstallMode::Soft,
            force,
            end_response,
            notify_peers,
        };
        self.remove(name, options, progress).await
    }

    /// Remove an installed app. Only `end_response` removals emit a terminal line.
    pub async fn remove(
        &self,
        name: &str,
        options: RemoveOptions,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        let result = self.remove_guarded(name, options, progress).await;
        match &result {
            Ok(()) => {
                info!("Application {} removed", name);
                if options.end_response {
                    progress.send(ProgressMessage::success(format!(
                        "Application {} was successfully removed",
                        name
                    )));
                }
            }
            Err(e) => {
                error!("Removal of {} failed: {}", name, e);
                if options.end_response {
                    progress.send(e.to_progress());
                }
            }
        }
        result
    }

    async fn remove_guarded(
        &self,
        name: &str,
        options: RemoveOptions,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        let _guard = self.state.progress.try_begin_removal(options.force)?;

        let spec = match self.caps.store.installed_app(name).await? {
            Some(spec) => spec,
            None if options.force => self
                .caps
                .store
                .global_app(name)
                .await?
                .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?,
            None => return Err(LifecycleError::NotFound(name.to_string())),
        };

        progress.status(format!("Removing {}", name));
        self.teardown(&spec, options, progress).await;

        self.caps.store.remove_app(name).await?;
        progress.status("Cleaning up unused container resources");
        log_step(name, "prune", self.caps.runtime.prune().await);

        if let Ok(Some(ip)) = self.caps.network.public_ip().await {
            log_step(
                name,
                "run location removal",
                self.caps.store.remove_run_location(name, &ip).await,
            );
        }
        if options.notify_peers {
            log_step(
                name,
                "removal broadcast",
                self.caps.network.broadcast_removed(name).await,
            );
        }
        Ok(())
    }

    /// Tear down every component in reverse install order, then the app
    /// network. Every step is attempted regardless of earlier failures.
    pub(super) async fn teardown(
        &self,
        spec: &AppSpecification,
        options: RemoveOptions,
        progress: &ProgressSender,
    ) {
        for component in spec.components().iter().rev() {
            self.teardown_component(component, options.mode, progress)
                .await;
        }
        log_step(
            &spec.name,
            "network removal",
            self.caps
                .runtime
                .remove_network(&self.network_name(&spec.name))
                .await,
        );
    }

    async fn teardown_component(
        &self,
        component: &AppComponent,
        mode: InstallMode,
        progress: &ProgressSender,
    ) {
        let app_id = component.app_id(&self.config.node.container_prefix);
        let runtime = &self.caps.runtime;
        info!("Tearing down component {}", app_id);

        self.monitor
            .stop_monitoring(&app_id, mode == InstallMode::Hard);

        progress.status(format!("Stopping container {}", app_id));
        log_step(&app_id, "stop", runtime.stop_container(&app_id).await);
        progress.status(format!("Removing container {}", app_id));
        log_step(&app_id, "container removal", runtime.remove_container(&app_id).await);
        log_step(
            &app_id,
            "image removal",
            runtime.remove_image(&component.spec.repotag).await,
        );

        if !self.config.apps.test_mode {
            for port in &component.spec.ports {
                log_step(&app_id, "port denial", self.caps.firewall.deny_port(*port).await);
                if self.config.apps.upnp {
                    log_step(&app_id, "UPnP unmap", self.caps.firewall.unmap_upnp(*port).await);
                }
            }
        }

        if mode == InstallMode::Hard {
            progress.status(format!("Removing volume of {}", app_id));
            self.volumes.release(&app_id).await;
        }
    }

    /// Remove and reinstall an installed app; a soft redeploy keeps its volume
    pub async fn redeploy(
        &self,
        name: &str,
        hard: bool,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        let spec = match self.caps.store.installed_app(name).await {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                let err = LifecycleError::NotFound(name.to_string());
                progress.send(err.to_progress());
                return Err(err);
            }
            Err(e) => {
                let err = LifecycleError::from(e);
                progress.send(err.to_progress());
                return Err(err);
            }
        };

        let mode = if hard {
            InstallMode::Hard
        } else {
            InstallMode::Soft
        };
        let options = RemoveOptions {
            mode,
            force: false,
            end_response: false,
            notify_peers: false,
        };
        progress.status(format!("Redeploying {}", name));
        if let Err(e) = self.remove(name, options, progress).await {
            progress.send(e.to_progress());
            return Err(e);
        }
        self.install(spec, mode, progress).await
    }
}
