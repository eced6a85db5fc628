//! Docker daemon backed [`ContainerEngine`].

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, EndpointSettings, HostConfig};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use super::{ContainerEngine, ContainerInfo, ContainerSpec, ContainerState, EngineError};

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon and verify it answers.
    pub async fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults().map_err(api_error)?;
        docker.ping().await.map_err(api_error)?;
        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }
}

fn api_error(err: bollard::errors::Error) -> EngineError {
    EngineError::Api(err.to_string())
}

fn is_status(err: &bollard::errors::Error, code: u16) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

fn map_state(state: Option<&bollard::models::ContainerState>) -> ContainerState {
    let Some(state) = state else {
        return ContainerState::Unknown;
    };
    match state.status {
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Starting,
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Stopped,
        Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
            ContainerState::Exited(state.exit_code.unwrap_or(-1))
        }
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Stopped,
        _ => ContainerState::Unknown,
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => {
                let networks = inspect
                    .network_settings
                    .as_ref()
                    .and_then(|ns| ns.networks.as_ref())
                    .map(|nets| nets.keys().cloned().collect())
                    .unwrap_or_default();
                Ok(Some(ContainerInfo {
                    state: map_state(inspect.state.as_ref()),
                    image_id: inspect.image.clone(),
                    networks,
                }))
            }
            Err(e) if is_status(&e, 404) => Ok(None),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), EngineError> {
        let host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.name.clone()),
            env: Some(spec.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(api_error)?;
        debug!(container = %spec.name, image = %spec.image, "Container created");
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(_) => Ok(()),
            // Already started
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(EngineError::NotFound(name.to_string())),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn stop_container(&self, name: &str) -> Result<(), EngineError> {
        let options = StopContainerOptions { t: 30 };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(_) => Ok(()),
            // Already stopped
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(EngineError::NotFound(name.to_string())),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn ensure_network(&self, network: &str) -> Result<(), EngineError> {
        let networks = self
            .docker
            .list_networks::<String>(None)
            .await
            .map_err(api_error)?;
        let exists = networks
            .iter()
            .any(|n| n.name.as_deref() == Some(network));
        if exists {
            return Ok(());
        }

        let config = CreateNetworkOptions {
            name: network.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        };
        self.docker.create_network(config).await.map_err(api_error)?;
        info!(network = %network, "Created Docker network");
        Ok(())
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<(), EngineError> {
        let config = ConnectNetworkOptions {
            container: container.to_string(),
            endpoint_config: EndpointSettings::default(),
        };
        self.docker
            .connect_network(network, config)
            .await
            .map_err(api_error)
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(image = %image, error = %e, "Image pull failed");
                    return Err(api_error(e));
                }
            }
        }
        Ok(())
    }

    async fn local_image_digests(&self, image_id: &str) -> Result<Vec<String>, EngineError> {
        match self.docker.inspect_image(image_id).await {
            Ok(image) => Ok(image.repo_digests.unwrap_or_default()),
            Err(e) if is_status(&e, 404) => Err(EngineError::NotFound(image_id.to_string())),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn remote_image_digest(&self, image: &str) -> Result<String, EngineError> {
        let inspect = self
            .docker
            .inspect_registry_image(image, None)
            .await
            .map_err(|e| EngineError::Registry(e.to_string()))?;
        inspect
            .descriptor
            .digest
            .ok_or_else(|| EngineError::Registry(format!("registry returned no digest for {image}")))
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let logs: Vec<_> = match self.docker.logs(name, Some(options)).try_collect().await {
            Ok(logs) => logs,
            Err(e) if is_status(&e, 404) => return Err(EngineError::NotFound(name.to_string())),
            Err(e) => return Err(api_error(e)),
        };
        Ok(logs.into_iter().map(|log| log.to_string()).collect())
    }
}
