use std::sync::Arc;
use tracing::{debug, info, warn};

use super::update_checker::{UpdateChecker, UpdateStatus};
use super::{
    ContainerDefinitions, ContainerEngine, ContainerInfo, ContainerName, ContainerSpec,
    ContainerState,
};
use crate::data::config_store::{
    APPLICATION_PASSWORD, BACKUP_PASSWORD, BackupMode, ConfigurationStore,
};
use crate::web::error::AppError;

/// Lines of output returned by [`DockerActionManager::get_logs`].
const LOG_TAIL: usize = 500;
/// Mount point of a local backup location inside the backup container.
const BACKUP_MOUNT: &str = "/mnt/borgbackup";
const DOCKER_SOCKET_BIND: &str = "/var/run/docker.sock:/var/run/docker.sock:ro";
const DOMAINCHECK_INSTANCE_ID: &str = "INSTANCE_ID";

/// Lifecycle actions on the managed containers.
///
/// Calls for different containers may run concurrently; nothing here holds a
/// lock across engine round trips.
pub struct DockerActionManager {
    engine: Arc<dyn ContainerEngine>,
    config: Arc<ConfigurationStore>,
    definitions: Arc<ContainerDefinitions>,
    update_checker: Arc<UpdateChecker>,
}

impl DockerActionManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        config: Arc<ConfigurationStore>,
        definitions: Arc<ContainerDefinitions>,
        update_checker: Arc<UpdateChecker>,
    ) -> Self {
        Self {
            engine,
            config,
            definitions,
            update_checker,
        }
    }

    pub async fn inspect(&self, name: ContainerName) -> Result<Option<ContainerInfo>, AppError> {
        Ok(self.engine.inspect_container(name.container_name()).await?)
    }

    /// Current lifecycle state; a container that does not exist is stopped.
    pub async fn container_state(&self, name: ContainerName) -> Result<ContainerState, AppError> {
        Ok(self
            .inspect(name)
            .await?
            .map_or(ContainerState::Stopped, |info| info.state))
    }

    /// Attaches the container to its network. Already attached is a no-op.
    pub async fn connect_container_to_network(&self, name: ContainerName) -> Result<(), AppError> {
        let definition = self.definitions.get(name);
        self.connect_to_network(definition.container_name(), &definition.network)
            .await
    }

    /// Attaches the container this process runs in, so it can reach the
    /// containers it manages by name.
    pub async fn connect_master_container_to_network(&self) -> Result<(), AppError> {
        let master = self.definitions.master();
        self.connect_to_network(&master.container_name, &master.network)
            .await
    }

    async fn connect_to_network(&self, container: &str, network: &str) -> Result<(), AppError> {
        self.engine.ensure_network(network).await?;

        let info = self
            .engine
            .inspect_container(container)
            .await?
            .ok_or_else(|| AppError::NotFound(container.to_string()))?;
        if info.networks.iter().any(|n| n == network) {
            debug!(container, network, "Already connected to network");
            return Ok(());
        }

        self.engine.connect_network(network, container).await?;
        info!(container, network, "Connected container to network");
        Ok(())
    }

    /// Starts the container, creating it from its definition if needed.
    /// Starting a running container is a no-op.
    pub async fn start_container(&self, name: ContainerName) -> Result<(), AppError> {
        if name == ContainerName::Application {
            self.prepare_application_start().await?;
        }

        match self.inspect(name).await? {
            Some(info) if info.state.is_running() => {
                debug!(container = %name, "Container already running");
                return Ok(());
            }
            Some(_) if name.is_one_shot() => {
                self.engine.remove_container(name.container_name()).await?;
                self.create(name, Vec::new()).await?;
            }
            // Created before the network existed or detached by hand.
            Some(_) => self.connect_container_to_network(name).await?,
            None => self.create(name, Vec::new()).await?,
        }

        self.engine.start_container(name.container_name()).await?;
        info!(container = %name, "Container started");
        Ok(())
    }

    /// The application needs a domain; once started the domain is frozen and
    /// the domain-check container has to give up its port.
    async fn prepare_application_start(&self) -> Result<(), AppError> {
        if self.config.domain().await.is_none_or(|d| d.is_empty()) {
            return Err(AppError::NotSet("domain".to_string()));
        }
        self.config
            .update(|c| {
                c.flags.start_button_clicked = true;
                Ok(())
            })
            .await?;
        self.stop_container(ContainerName::Domaincheck).await
    }

    /// Stops the container. Stopping a stopped or missing container is a no-op.
    pub async fn stop_container(&self, name: ContainerName) -> Result<(), AppError> {
        match self.inspect(name).await? {
            Some(info) if info.state.is_running() => {
                self.engine.stop_container(name.container_name()).await?;
                info!(container = %name, "Container stopped");
            }
            _ => debug!(container = %name, "Container not running, nothing to stop"),
        }
        Ok(())
    }

    /// Recreates a one-shot container with `extra_env` and starts it.
    pub async fn run_one_shot(
        &self,
        name: ContainerName,
        extra_env: Vec<String>,
    ) -> Result<(), AppError> {
        self.engine.remove_container(name.container_name()).await?;
        self.create(name, extra_env).await?;
        self.engine.start_container(name.container_name()).await?;
        info!(container = %name, "One-shot container started");
        Ok(())
    }

    pub async fn get_logs(&self, name: ContainerName) -> Result<String, AppError> {
        if self.inspect(name).await?.is_none() {
            return Err(AppError::NotFound(name.container_name().to_string()));
        }
        Ok(self.engine.logs(name.container_name(), LOG_TAIL).await?)
    }

    pub async fn is_update_available(&self, name: ContainerName) -> UpdateStatus {
        self.update_checker.is_update_available(name).await
    }

    pub async fn is_master_update_available(&self) -> UpdateStatus {
        self.update_checker.is_master_update_available().await
    }

    pub async fn is_any_update_available(&self) -> bool {
        self.update_checker.is_any_update_available().await
    }

    async fn create(&self, name: ContainerName, extra_env: Vec<String>) -> Result<(), AppError> {
        let mut spec = self.container_spec(name).await?;
        spec.env.extend(extra_env);

        // A missing registry is not fatal when the image is already present.
        if let Err(e) = self.engine.pull_image(&spec.image).await {
            warn!(container = %name, image = %spec.image, error = %e, "Image pull failed, using local image");
        }
        self.update_checker.invalidate(name);

        self.engine.ensure_network(&spec.network).await?;
        self.engine.create_container(&spec).await?;
        Ok(())
    }

    async fn container_spec(&self, name: ContainerName) -> Result<ContainerSpec, AppError> {
        let definition = self.definitions.get(name);
        let mut spec = ContainerSpec {
            name: definition.container_name().to_string(),
            image: definition.image.clone(),
            network: definition.network.clone(),
            env: Vec::new(),
            binds: Vec::new(),
        };

        match name {
            ContainerName::Application => {
                let domain = self.config.domain().await.unwrap_or_default();
                let password = self.config.ensure_secret(APPLICATION_PASSWORD).await?;
                spec.env.push(format!("NC_DOMAIN={domain}"));
                spec.env.push(format!("ADMIN_PASSWORD={password}"));
            }
            ContainerName::Backup => {
                let snapshot = self.config.snapshot().await;
                let password = self.config.ensure_secret(BACKUP_PASSWORD).await?;
                spec.env.push(format!("BORG_PASSWORD={password}"));
                if let Some(location) = snapshot.backup_host_location {
                    let mode = snapshot
                        .backup_mode
                        .unwrap_or_else(|| BackupMode::from_location(&location));
                    match mode {
                        BackupMode::Local => {
                            spec.binds.push(format!("{location}:{BACKUP_MOUNT}:rw"));
                            spec.env.push(format!("BORG_REPO={BACKUP_MOUNT}/borg"));
                        }
                        BackupMode::Remote => spec.env.push(format!("BORG_REPO={location}")),
                    }
                }
            }
            ContainerName::Watcher => {
                let master = &self.definitions.master().container_name;
                spec.env.push(format!("CONTAINER_TO_UPDATE={master}"));
                spec.binds.push(DOCKER_SOCKET_BIND.to_string());
            }
            ContainerName::Domaincheck => {
                let instance_id = self.config.ensure_secret(DOMAINCHECK_INSTANCE_ID).await?;
                spec.env.push(format!("INSTANCE_ID={instance_id}"));
            }
        }
        Ok(spec)
    }
}
