//! Backup, backup-check and restore runs of the backup container.
//!
//! All three kinds share one global single-flight slot: at most one run is in
//! flight at any time, whatever its kind. Starting a run only launches the
//! container; a background task polls it until it exits and then records the
//! outcome. A non-zero exit code is a reported outcome, never retried.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use crate::data::config_store::{BackupKind, ConfigurationStore};
use crate::docker::action_manager::DockerActionManager;
use crate::docker::{ContainerName, ContainerState};
use crate::web::error::AppError;

/// Exit code recorded when the backup container disappears mid-run.
pub const VANISHED_EXIT_CODE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "exit_code", rename_all = "snake_case")]
pub enum BackupOutcome {
    Success,
    Failure(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRun {
    pub kind: BackupKind,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
}

impl BackupRun {
    fn started(kind: BackupKind) -> Self {
        Self {
            kind,
            started_at: Utc::now(),
            completed_at: None,
            exit_code: None,
        }
    }

    /// `None` while the run is still in flight.
    pub fn outcome(&self) -> Option<BackupOutcome> {
        self.exit_code.map(|code| match code {
            0 => BackupOutcome::Success,
            code => BackupOutcome::Failure(code),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum BackupState {
    Idle,
    Running(BackupKind),
}

pub struct BackupOrchestrator {
    docker: Arc<DockerActionManager>,
    config: Arc<ConfigurationStore>,
    in_flight: Mutex<Option<BackupRun>>,
    last_run: Mutex<Option<BackupRun>>,
    state_tx: watch::Sender<BackupState>,
    poll_interval: Duration,
}

impl BackupOrchestrator {
    pub fn new(
        docker: Arc<DockerActionManager>,
        config: Arc<ConfigurationStore>,
        poll_interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(BackupState::Idle);
        Self {
            docker,
            config,
            in_flight: Mutex::new(None),
            last_run: Mutex::new(None),
            state_tx,
            poll_interval,
        }
    }

    pub async fn start_backup(self: &Arc<Self>) -> Result<(), AppError> {
        self.start(BackupKind::Backup).await
    }

    pub async fn start_check(self: &Arc<Self>) -> Result<(), AppError> {
        self.start(BackupKind::Check).await
    }

    pub async fn start_restore(self: &Arc<Self>) -> Result<(), AppError> {
        self.start(BackupKind::Restore).await
    }

    /// Launches a run and returns as soon as the container is started.
    pub async fn start(self: &Arc<Self>, kind: BackupKind) -> Result<(), AppError> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(run) = in_flight.as_ref() {
                warn!(requested = %kind, running = %run.kind, "Backup container is busy");
                return Err(AppError::AlreadyRunning(run.kind.to_string()));
            }
            *in_flight = Some(BackupRun::started(kind));
        }
        self.state_tx.send_replace(BackupState::Running(kind));

        if let Err(e) = self.launch(kind).await {
            error!(kind = %kind, error = %e, "Failed to launch backup container");
            *self.in_flight.lock().await = None;
            self.state_tx.send_replace(BackupState::Idle);
            return Err(e);
        }

        info!(kind = %kind, "Backup container run started");
        self.spawn_watcher(kind);
        Ok(())
    }

    async fn launch(&self, kind: BackupKind) -> Result<(), AppError> {
        // A run left behind by an earlier process and not yet adopted.
        if self
            .docker
            .container_state(ContainerName::Backup)
            .await?
            .is_running()
        {
            return Err(AppError::AlreadyRunning(
                ContainerName::Backup.container_name().to_string(),
            ));
        }
        self.config
            .update(|c| {
                c.backup_operation = Some(kind);
                Ok(())
            })
            .await?;
        self.docker
            .run_one_shot(ContainerName::Backup, vec![format!("BORG_MODE={kind}")])
            .await
    }

    /// Adopts a backup container that is still running from before a restart.
    pub async fn recover_in_flight(self: &Arc<Self>) -> Result<Option<BackupKind>, AppError> {
        if !self
            .docker
            .container_state(ContainerName::Backup)
            .await?
            .is_running()
        {
            return Ok(None);
        }

        let kind = self
            .config
            .snapshot()
            .await
            .backup_operation
            .unwrap_or(BackupKind::Backup);
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.is_some() {
                return Ok(None);
            }
            *in_flight = Some(BackupRun::started(kind));
        }
        self.state_tx.send_replace(BackupState::Running(kind));
        info!(kind = %kind, "Adopted running backup container");
        self.spawn_watcher(kind);
        Ok(Some(kind))
    }

    fn spawn_watcher(self: &Arc<Self>, kind: BackupKind) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let exit_code = orchestrator.wait_for_exit(kind).await;
            orchestrator.complete(exit_code).await;
        });
    }

    async fn wait_for_exit(&self, kind: BackupKind) -> i64 {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            match self.docker.inspect(ContainerName::Backup).await {
                Ok(Some(info)) => {
                    if let ContainerState::Exited(code) = info.state {
                        return code;
                    }
                }
                Ok(None) => {
                    warn!(kind = %kind, "Backup container vanished while running");
                    return VANISHED_EXIT_CODE;
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Failed to poll backup container, retrying");
                }
            }
        }
    }

    async fn complete(&self, exit_code: i64) {
        let Some(mut run) = self.in_flight.lock().await.clone() else {
            return;
        };
        let now = Utc::now();
        run.completed_at = Some(now);
        run.exit_code = Some(exit_code);

        let kind = run.kind;
        let recorded = self
            .config
            .update(|c| {
                c.last_backup_exit_code = Some(exit_code);
                c.flags.backup_run_once = true;
                if kind == BackupKind::Backup && exit_code == 0 {
                    c.last_backup_time = Some(now);
                }
                Ok(())
            })
            .await;
        if let Err(e) = recorded {
            error!(kind = %kind, exit_code, error = %e, "Failed to record backup outcome");
        }

        match run.outcome() {
            Some(BackupOutcome::Success) => info!(kind = %kind, "Backup container run succeeded"),
            _ => warn!(kind = %kind, exit_code, "Backup container run failed"),
        }

        *self.last_run.lock().await = Some(run);
        *self.in_flight.lock().await = None;
        self.state_tx.send_replace(BackupState::Idle);
    }

    pub fn state(&self) -> BackupState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BackupState> {
        self.state_tx.subscribe()
    }

    pub async fn current_run(&self) -> Option<BackupRun> {
        self.in_flight.lock().await.clone()
    }

    pub async fn last_run(&self) -> Option<BackupRun> {
        self.last_run.lock().await.clone()
    }

    pub async fn get_exit_code(&self) -> Option<i64> {
        self.config.last_backup_exit_code().await
    }

    pub async fn has_run_once(&self) -> bool {
        self.config.has_backup_run_once().await
    }

    pub async fn get_last_backup_time(&self) -> Option<DateTime<Utc>> {
        self.config.last_backup_time().await
    }
}
