use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;

use crate::data::config_store::BackupKind;
use crate::docker::ContainerName;
use crate::web::{
    AppState,
    error::AppError,
    models::{BackupStartedResponse, ContainerRequest, LogsResponse, MessageResponse},
};

/// Mutating container actions. Mounted behind CSRF and auth.
pub fn create_docker_action_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/watchtower", post(start_watcher))
        .route("/start", post(start_application))
        .route("/backup", post(start_backup))
        .route("/backup-check", post(start_backup_check))
        .route("/restore", post(start_restore))
        .route("/stop", post(stop_container))
}

/// Read-only container queries. Mounted behind auth.
pub fn create_docker_query_router() -> Router<Arc<AppState>> {
    Router::new().route("/logs", get(get_logs))
}

async fn start_watcher(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    state.docker.start_container(ContainerName::Watcher).await?;
    Ok(Json(MessageResponse::new("Watcher container started")))
}

async fn start_application(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    state
        .docker
        .start_container(ContainerName::Application)
        .await?;
    Ok(Json(MessageResponse::new("Application container started")))
}

async fn start_backup(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    state.backup.start_backup().await?;
    Ok(started(BackupKind::Backup))
}

async fn start_backup_check(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    state.backup.start_check().await?;
    Ok(started(BackupKind::Check))
}

async fn start_restore(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    state.backup.start_restore().await?;
    Ok(started(BackupKind::Restore))
}

/// The run continues in the background; only its start is acknowledged.
fn started(operation: BackupKind) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(BackupStartedResponse {
            operation,
            status: "started".to_string(),
        }),
    )
}

async fn stop_container(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ContainerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name: ContainerName = payload.id.parse()?;
    state.docker.stop_container(name).await?;
    Ok(Json(MessageResponse::new(format!("{name} stopped"))))
}

async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContainerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name: ContainerName = query.id.parse()?;
    let logs = state.docker.get_logs(name).await?;
    Ok(Json(LogsResponse {
        id: name.container_name().to_string(),
        logs,
    }))
}
