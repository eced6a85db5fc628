//! Container engine capability and the components built on top of it.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod action_manager;
pub mod definitions;
pub mod engine;
pub mod update_checker;

#[cfg(test)]
pub mod testing;

pub use definitions::{
    ContainerDefinitions, ContainerName, ContainerState, ManagedContainer, MasterContainer,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("No such container or image: {0}")]
    NotFound(String),
    #[error("Container engine request failed: {0}")]
    Api(String),
    #[error("Registry request failed: {0}")]
    Registry(String),
}

/// What the engine reports about an existing container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub state: ContainerState,
    /// Image id the container was created from.
    pub image_id: Option<String>,
    pub networks: Vec<String>,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub env: Vec<String>,
    pub binds: Vec<String>,
}

impl ContainerSpec {
    pub fn env_map(&self) -> HashMap<&str, &str> {
        self.env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .collect()
    }
}

/// The container runtime, treated as an opaque capability.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// `Ok(None)` when the container does not exist.
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), EngineError>;

    async fn start_container(&self, name: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, name: &str) -> Result<(), EngineError>;

    /// Removing a missing container is not an error.
    async fn remove_container(&self, name: &str) -> Result<(), EngineError>;

    /// Creates the network when it is missing.
    async fn ensure_network(&self, network: &str) -> Result<(), EngineError>;

    async fn connect_network(&self, network: &str, container: &str) -> Result<(), EngineError>;

    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// Repository digests of the locally present image, e.g. `repo@sha256:...`.
    async fn local_image_digests(&self, image_id: &str) -> Result<Vec<String>, EngineError>;

    /// Digest the registry currently serves for `image`.
    async fn remote_image_digest(&self, image: &str) -> Result<String, EngineError>;

    async fn logs(&self, name: &str, tail: usize) -> Result<String, EngineError>;
}
