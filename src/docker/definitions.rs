use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::web::error::AppError;

/// The fixed set of containers this master container manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerName {
    Application,
    Backup,
    Watcher,
    Domaincheck,
}

impl ContainerName {
    pub const ALL: [ContainerName; 4] = [
        ContainerName::Application,
        ContainerName::Backup,
        ContainerName::Watcher,
        ContainerName::Domaincheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerName::Application => "application",
            ContainerName::Backup => "backup",
            ContainerName::Watcher => "watcher",
            ContainerName::Domaincheck => "domaincheck",
        }
    }

    /// Name of the container as the engine knows it.
    pub fn container_name(&self) -> &'static str {
        match self {
            ContainerName::Application => "nextcloud-aio-nextcloud",
            ContainerName::Backup => "nextcloud-aio-borgbackup",
            ContainerName::Watcher => "nextcloud-aio-watchtower",
            ContainerName::Domaincheck => "nextcloud-aio-domaincheck",
        }
    }

    fn image_repository(&self) -> &'static str {
        match self {
            ContainerName::Application => "aio-nextcloud",
            ContainerName::Backup => "aio-borgbackup",
            ContainerName::Watcher => "aio-watchtower",
            ContainerName::Domaincheck => "aio-domaincheck",
        }
    }

    /// One-shot containers run to completion and are recreated for every run.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, ContainerName::Backup | ContainerName::Watcher)
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerName {
    type Err = AppError;

    /// Accepts either the logical name or the engine-level container name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContainerName::ALL
            .into_iter()
            .find(|name| name.as_str() == s || name.container_name() == s)
            .ok_or_else(|| AppError::NotFound(format!("'{s}' is not a managed container")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "exit_code", rename_all = "snake_case")]
pub enum ContainerState {
    Unknown,
    Stopped,
    Starting,
    Running,
    Exited(i64),
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running | ContainerState::Starting)
    }
}

/// Static definition of one managed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub name: ContainerName,
    pub image: String,
    pub network: String,
}

impl ManagedContainer {
    pub fn container_name(&self) -> &'static str {
        self.name.container_name()
    }
}

/// Engine name of the container this process runs in, unless configured otherwise.
pub const MASTER_CONTAINER_NAME: &str = "nextcloud-aio-mastercontainer";

/// The container running this process. It is never started or stopped from
/// here, only attached to the network and checked for updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterContainer {
    pub container_name: String,
    pub image: String,
    pub network: String,
}

/// Definitions for every [`ContainerName`], fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ContainerDefinitions {
    definitions: Vec<ManagedContainer>,
    master: MasterContainer,
}

impl ContainerDefinitions {
    pub fn new(image_prefix: &str, image_tag: &str, network: &str) -> Self {
        let definitions = ContainerName::ALL
            .into_iter()
            .map(|name| ManagedContainer {
                name,
                image: format!("{image_prefix}{}:{image_tag}", name.image_repository()),
                network: network.to_string(),
            })
            .collect();
        let master = MasterContainer {
            container_name: MASTER_CONTAINER_NAME.to_string(),
            image: format!("{image_prefix}all-in-one:{image_tag}"),
            network: network.to_string(),
        };
        Self {
            definitions,
            master,
        }
    }

    pub fn with_master_container_name(mut self, container_name: &str) -> Self {
        self.master.container_name = container_name.to_string();
        self
    }

    pub fn get(&self, name: ContainerName) -> &ManagedContainer {
        // `new` builds one entry per variant in declaration order.
        &self.definitions[name as usize]
    }

    pub fn master(&self) -> &MasterContainer {
        &self.master
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_logical_and_engine_names() {
        assert_eq!("backup".parse::<ContainerName>().unwrap(), ContainerName::Backup);
        assert_eq!(
            "nextcloud-aio-watchtower".parse::<ContainerName>().unwrap(),
            ContainerName::Watcher
        );
        let err = "postgres".parse::<ContainerName>().unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_definitions_cover_every_container() {
        let defs = ContainerDefinitions::new("nextcloud/", "latest", "nextcloud-aio");
        for name in ContainerName::ALL {
            let def = defs.get(name);
            assert_eq!(def.name, name);
            assert_eq!(def.network, "nextcloud-aio");
        }
        assert_eq!(
            defs.get(ContainerName::Backup).image,
            "nextcloud/aio-borgbackup:latest"
        );
        assert_eq!(defs.master().container_name, MASTER_CONTAINER_NAME);
        assert_eq!(defs.master().image, "nextcloud/all-in-one:latest");
        assert_eq!(defs.master().network, "nextcloud-aio");

        let renamed = defs.with_master_container_name("aio-master");
        assert_eq!(renamed.master().container_name, "aio-master");
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(ContainerState::Exited(1)).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "exited", "exit_code": 1 }));
    }
}
