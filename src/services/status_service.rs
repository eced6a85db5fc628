use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::data::config_store::{
    APPLICATION_PASSWORD, BACKUP_PASSWORD, BackupKind, BackupMode, ConfigurationStore,
};
use crate::docker::action_manager::DockerActionManager;
use crate::docker::update_checker::UpdateStatus;
use crate::docker::{ContainerName, ContainerState};
use crate::services::backup_service::BackupOrchestrator;

/// What the containers page shows.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub domain: Option<String>,
    pub backup_host_location: Option<String>,
    pub backup_mode: Option<BackupMode>,
    pub containers: BTreeMap<&'static str, ContainerState>,
    /// Initial admin password of the application.
    pub nextcloud_password: Option<String>,
    pub backup_password: Option<String>,
    pub has_backup_run_once: bool,
    pub backup_exit_code: Option<i64>,
    pub last_backup_time: Option<DateTime<Utc>>,
    pub current_backup_operation: Option<BackupKind>,
    pub was_start_button_clicked: bool,
    pub is_any_update_available: bool,
    pub is_mastercontainer_update_available: bool,
}

/// Read-only projection of configuration and container state.
pub struct StatusService {
    config: Arc<ConfigurationStore>,
    docker: Arc<DockerActionManager>,
    backup: Arc<BackupOrchestrator>,
}

impl StatusService {
    pub fn new(
        config: Arc<ConfigurationStore>,
        docker: Arc<DockerActionManager>,
        backup: Arc<BackupOrchestrator>,
    ) -> Self {
        Self {
            config,
            docker,
            backup,
        }
    }

    /// Never fails: engine errors show up as `Unknown` container states.
    pub async fn report(&self) -> StatusReport {
        let snapshot = self.config.snapshot().await;

        let states = join_all(ContainerName::ALL.map(|name| async move {
            let state = match self.docker.container_state(name).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(container = %name, error = %e, "Failed to read container state");
                    ContainerState::Unknown
                }
            };
            (name.as_str(), state)
        }))
        .await;

        let (is_any_update_available, master_update, current_run) = tokio::join!(
            self.docker.is_any_update_available(),
            self.docker.is_master_update_available(),
            self.backup.current_run()
        );

        StatusReport {
            domain: snapshot.domain,
            backup_host_location: snapshot.backup_host_location,
            backup_mode: snapshot.backup_mode,
            containers: states.into_iter().collect(),
            nextcloud_password: snapshot.secrets.get(APPLICATION_PASSWORD).cloned(),
            backup_password: snapshot.secrets.get(BACKUP_PASSWORD).cloned(),
            has_backup_run_once: snapshot.flags.backup_run_once,
            backup_exit_code: snapshot.last_backup_exit_code,
            last_backup_time: snapshot.last_backup_time,
            current_backup_operation: current_run.map(|run| run.kind),
            was_start_button_clicked: snapshot.flags.start_button_clicked,
            is_any_update_available,
            is_mastercontainer_update_available: master_update == UpdateStatus::Available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config_store::ConfigKey;
    use crate::docker::ContainerDefinitions;
    use crate::docker::testing::FakeEngine;
    use crate::docker::update_checker::UpdateChecker;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service() -> (TempDir, Arc<FakeEngine>, Arc<ConfigurationStore>, StatusService) {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let config = Arc::new(ConfigurationStore::open(dir.path()).unwrap());
        let defs = Arc::new(ContainerDefinitions::new("nextcloud/", "latest", "aio"));
        let checker = Arc::new(UpdateChecker::new(
            engine.clone(),
            defs.clone(),
            Duration::from_secs(60),
        ));
        let docker = Arc::new(DockerActionManager::new(
            engine.clone(),
            config.clone(),
            defs,
            checker,
        ));
        let backup = Arc::new(BackupOrchestrator::new(
            docker.clone(),
            config.clone(),
            Duration::from_millis(10),
        ));
        let status = StatusService::new(config.clone(), docker, backup);
        (dir, engine, config, status)
    }

    #[tokio::test]
    async fn test_report_on_first_boot() {
        let (_dir, _engine, _config, status) = service();
        let report = status.report().await;
        assert!(report.domain.is_none());
        assert!(report.backup_password.is_none());
        assert!(report.nextcloud_password.is_none());
        assert!(!report.is_mastercontainer_update_available);
        assert!(!report.has_backup_run_once);
        assert!(!report.is_any_update_available);
        assert_eq!(report.containers.len(), ContainerName::ALL.len());
        assert!(report.containers.values().all(|s| *s == ContainerState::Stopped));
    }

    #[tokio::test]
    async fn test_report_reflects_configuration_and_containers() {
        let (_dir, engine, config, status) = service();
        config.set(ConfigKey::Domain, "cloud.example.com").await.unwrap();
        config.set(ConfigKey::LastBackupExitCode, "2").await.unwrap();
        engine.insert_container("nextcloud-aio-nextcloud", "img", ContainerState::Running);

        let report = status.report().await;
        assert_eq!(report.domain.as_deref(), Some("cloud.example.com"));
        assert_eq!(report.backup_exit_code, Some(2));
        assert_eq!(report.containers["application"], ContainerState::Running);
        assert!(report.current_backup_operation.is_none());
    }

    #[tokio::test]
    async fn test_report_shows_passwords_and_master_update() {
        let (_dir, engine, config, status) = service();
        config.set_secret(APPLICATION_PASSWORD, "admin-secret").await.unwrap();
        config.set_secret(BACKUP_PASSWORD, "borg-secret").await.unwrap();
        let image = "nextcloud/all-in-one:latest";
        engine.insert_container("nextcloud-aio-mastercontainer", image, ContainerState::Running);
        engine.set_local_digests(image, &["nextcloud/all-in-one@sha256:old"]);
        engine.set_remote_digest(image, "sha256:new");

        let report = status.report().await;
        assert_eq!(report.nextcloud_password.as_deref(), Some("admin-secret"));
        assert_eq!(report.backup_password.as_deref(), Some("borg-secret"));
        assert!(report.is_mastercontainer_update_available);
        assert!(!report.is_any_update_available);
        // The master container is not one of the managed containers.
        assert_eq!(report.containers.len(), ContainerName::ALL.len());
    }

    #[tokio::test]
    async fn test_engine_failure_reports_unknown() {
        let (_dir, engine, _config, status) = service();
        engine.fail("inspect");
        let report = status.report().await;
        assert!(report.containers.values().all(|s| *s == ContainerState::Unknown));
        assert!(!report.is_any_update_available);
    }
}
