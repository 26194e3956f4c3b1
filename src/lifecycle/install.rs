use tracing::{error, info, warn};

use super::{InstallMode, Lifecycle, LifecycleError, RemoveOptions};
use crate::monitoring::throttle::nano_cpus_for;
use crate::progress::{ProgressMessage, ProgressSender};
use crate::runtime::ContainerConfig;
use crate::spec::{validate_shape, AppComponent, AppSpecification};

use super::volume::mount_paths;

impl Lifecycle {
    pub async fn install_hard(
        &self,
        spec: AppSpecification,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        self.install(spec, InstallMode::Hard, progress).await
    }

    pub async fn install_soft(
        &self,
        spec: AppSpecification,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        self.install(spec, InstallMode::Soft, progress).await
    }

    /// Install `spec`, streaming progress and ending with one terminal line
    pub async fn install(
        &self,
        spec: AppSpecification,
        mode: InstallMode,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        let name = spec.name.clone();
        let result = self.install_guarded(spec, mode, progress).await;
        match &result {
            Ok(()) => {
                info!("Application {} installed", name);
                progress.send(ProgressMessage::success(format!(
                    "Application {} successfully installed",
                    name
                )));
            }
            Err(e) => {
                error!("Installation of {} failed: {}", name, e);
                progress.send(e.to_progress());
            }
        }
        result
    }

    async fn install_guarded(
        &self,
        spec: AppSpecification,
        mode: InstallMode,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        let _guard = self.state.progress.try_begin_install()?;

        progress.status(format!("Checking requirements of {}", spec.name));
        if self.caps.store.installed_app(&spec.name).await?.is_some() {
            return Err(LifecycleError::AlreadyInstalled(spec.name.clone()));
        }
        validate_shape(&spec)?;
        self.admission.admit(&spec).await?;

        if let Err(e) = self.deploy(&spec, mode, progress).await {
            progress.status(format!("Rolling back {}", spec.name));
            self.roll_back(&spec, mode, progress).await;
            if let Err(be) = self.caps.network.broadcast_error(&spec.name, &e.to_string()).await {
                warn!("Error broadcast for {} failed: {}", spec.name, be);
            }
            return Err(e);
        }

        if let Err(e) = self.caps.network.broadcast_running(&spec.name).await {
            warn!("Running broadcast for {} failed: {}", spec.name, e);
        }
        if let Some(location) = self.own_location(&spec.name).await {
            if let Err(e) = self.caps.store.upsert_run_location(&location).await {
                warn!("Run location of {} not recorded: {}", spec.name, e);
            }
        }
        Ok(())
    }

    async fn deploy(
        &self,
        spec: &AppSpecification,
        mode: InstallMode,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        self.caps.store.insert_app(spec).await?;

        let network = self.network_name(&spec.name);
        progress.status(format!("Creating network {}", network));
        self.caps.runtime.create_network(&network).await?;

        for component in spec.components() {
            self.deploy_component(spec, &component, &network, mode, progress)
                .await?;
        }
        Ok(())
    }

    async fn deploy_component(
        &self,
        spec: &AppSpecification,
        component: &AppComponent,
        network: &str,
        mode: InstallMode,
        progress: &ProgressSender,
    ) -> Result<(), LifecycleError> {
        let app_id = component.app_id(&self.config.node.container_prefix);
        let resources = component.resources(self.config.node.tier);
        let repotag = component.spec.repotag.as_str();
        info!("Deploying component {} ({})", app_id, repotag);

        progress.status(format!("Verifying image {}", repotag));
        let auth = match component.spec.repoauth.as_deref().filter(|a| !a.is_empty()) {
            Some(repoauth) => Some(self.caps.images.decrypt_auth(repoauth, spec).await?),
            None => None,
        };
        self.caps.images.verify_image(repotag, auth.as_ref()).await?;

        progress.status(format!("Pulling image {}", repotag));
        self.caps
            .runtime
            .pull_image(repotag, auth.as_ref(), progress)
            .await?;

        let data = component.container_data();
        let paths = match mode {
            InstallMode::Hard => {
                self.volumes
                    .provision(&app_id, resources.hdd, &data, progress)
                    .await?
            }
            InstallMode::Soft => mount_paths(self.volumes.apps_folder(), &app_id),
        };

        let config = ContainerConfig {
            name: app_id.clone(),
            image: repotag.to_string(),
            network: network.to_string(),
            ports: component.port_pairs(),
            env: component.spec.environment_parameters.clone(),
            commands: component.spec.commands.clone(),
            volume: (!data.path.is_empty()).then(|| (paths.appdata.clone(), data.path.clone())),
            nano_cpus: nano_cpus_for(resources.cpu, 1.0),
            memory_mb: resources.ram,
        };
        progress.status(format!("Creating container {}", app_id));
        self.caps.runtime.create_container(&config).await?;

        if !self.config.apps.test_mode {
            for port in &component.spec.ports {
                progress.status(format!("Allowing port {}", port));
                self.caps.firewall.allow_port(*port).await?;
                if self.config.apps.upnp {
                    let description = format!("{} {}", self.config.node.container_prefix, app_id);
                    self.caps.firewall.map_upnp(*port, &description).await?;
                }
            }
        }

        if data.receive_only {
            progress.status(format!("{} is receive-only, not started", app_id));
        } else {
            progress.status(format!("Starting container {}", app_id));
            self.caps.runtime.start_container(&app_id).await?;
        }

        self.monitor.start_monitoring(&app_id, resources.cpu);
        Ok(())
    }

    /// Forced removal of a failed install; never emits a terminal line
    async fn roll_back(&self, spec: &AppSpecification, mode: InstallMode, progress: &ProgressSender) {
        let options = RemoveOptions {
            mode,
            force: true,
            end_response: false,
            notify_peers: false,
        };
        let _guard = match self.state.progress.try_begin_removal(true) {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Rollback of {} not started: {}", spec.name, e);
                return;
            }
        };
        self.teardown(spec, options, progress).await;
        if let Err(e) = self.caps.store.remove_app(&spec.name).await {
            warn!("Record of {} not removed during rollback: {}", spec.name, e);
        }
    }
}
