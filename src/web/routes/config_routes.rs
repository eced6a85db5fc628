use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;

use crate::data::config_store::ConfigurationUpdate;
use crate::web::{AppState, error::AppError, models::MessageResponse};

/// Mounted behind CSRF and auth.
pub fn create_configuration_router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(set_configuration))
}

/// Mounted behind auth.
pub fn create_status_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_status))
}

async fn set_configuration(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfigurationUpdate>,
) -> Result<impl IntoResponse, AppError> {
    state.config.set_configuration(payload).await?;
    Ok(Json(MessageResponse::new("Configuration saved")))
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status.report().await)
}
