//! The process-wide state object.
//!
//! Built once at startup from [`ServerConfig`] and a container engine. On
//! first boot the configuration record starts empty; it survives restarts,
//! sessions and the in-flight backup bookkeeping do not.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::data::config_store::ConfigurationStore;
use crate::data::session_store::SessionStore;
use crate::data::setup::SetupFlow;
use crate::docker::action_manager::DockerActionManager;
use crate::docker::update_checker::UpdateChecker;
use crate::docker::{ContainerDefinitions, ContainerEngine, ContainerName};
use crate::server::config::ServerConfig;
use crate::services::auth_service::AuthManager;
use crate::services::backup_service::BackupOrchestrator;
use crate::services::csrf_guard::CsrfGuard;
use crate::services::status_service::StatusService;
use crate::web::error::AppError;

/// How long a registry digest answer is trusted.
const UPDATE_CHECK_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct CoreServices {
    pub server_config: Arc<ServerConfig>,
    pub config: Arc<ConfigurationStore>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<AuthManager>,
    pub csrf: Arc<CsrfGuard>,
    pub setup: Arc<SetupFlow>,
    pub docker: Arc<DockerActionManager>,
    pub backup: Arc<BackupOrchestrator>,
    pub status: Arc<StatusService>,
}

impl CoreServices {
    pub fn new(
        server_config: Arc<ServerConfig>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Result<Self, AppError> {
        let config = Arc::new(ConfigurationStore::open(&server_config.data_dir)?);
        let sessions = Arc::new(
            SessionStore::new(server_config.session_idle_timeout()).with_anonymous_limits(
                server_config.anonymous_session_timeout(),
                server_config.max_anonymous_sessions,
            ),
        );
        let definitions = Arc::new(
            ContainerDefinitions::new(
                &server_config.image_prefix,
                &server_config.image_tag,
                &server_config.network_name,
            )
            .with_master_container_name(&server_config.master_container_name),
        );
        let update_checker = Arc::new(UpdateChecker::new(
            engine.clone(),
            definitions.clone(),
            UPDATE_CHECK_CACHE_TTL,
        ));
        let docker = Arc::new(DockerActionManager::new(
            engine,
            config.clone(),
            definitions,
            update_checker,
        ));
        let backup = Arc::new(BackupOrchestrator::new(
            docker.clone(),
            config.clone(),
            server_config.backup_poll_interval(),
        ));

        Ok(Self {
            auth: Arc::new(AuthManager::new(
                config.clone(),
                sessions.clone(),
                server_config.login_min_latency(),
            )),
            csrf: Arc::new(CsrfGuard::new(sessions.clone())),
            setup: Arc::new(SetupFlow::new(config.clone(), server_config.password_hash_cost)),
            status: Arc::new(StatusService::new(
                config.clone(),
                docker.clone(),
                backup.clone(),
            )),
            server_config,
            config,
            sessions,
            docker,
            backup,
        })
    }

    /// Startup work against the engine. Only the backup adoption is fatal;
    /// everything else is retried by the operator through the UI.
    pub async fn boot(&self) -> Result<(), AppError> {
        if let Some(kind) = self.backup.recover_in_flight().await? {
            info!(kind = %kind, "Resumed watching backup container");
        }

        // Outside a container, e.g. during development, there is nothing to attach.
        if let Err(e) = self.docker.connect_master_container_to_network().await {
            warn!(error = %e, "Failed to connect master container to network");
        }

        if self.config.is_setup_complete().await && !self.config.was_start_button_clicked().await {
            match self.docker.start_container(ContainerName::Domaincheck).await {
                Ok(()) => info!("Domain check container started"),
                Err(e) => warn!(error = %e, "Failed to start domain check container"),
            }
        }
        Ok(())
    }
}
