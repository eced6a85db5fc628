use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use crate::web::{AppState, error::AppError, models::SetupResponse, session_id};

/// Mounted behind CSRF: the anonymous session from `/api/auth/getlogin` suffices.
pub fn create_setup_router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(setup))
}

pub fn create_index_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(index))
}

async fn setup(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let password = state.setup.setup().await?;
    Ok(Json(SetupResponse { password }))
}

/// Where a browser landing on `/` should go.
async fn index(State(state): State<Arc<AppState>>, jar: CookieJar) -> Redirect {
    if state.setup.can_be_installed().await {
        return Redirect::to("/setup");
    }
    let authenticated = match session_id(&jar) {
        Some(id) => state.auth.is_authenticated(&id).await,
        None => false,
    };
    if authenticated {
        Redirect::to("/containers")
    } else {
        Redirect::to("/login")
    }
}
