use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use crate::web::{
    AppState,
    error::AppError,
    models::{LoginRequest, LoginResponse, LoginStatusResponse, MessageResponse},
    removal_cookie, session_cookie, session_id,
};

/// Login and logout; both carry the CSRF token of the current session.
pub fn create_auth_action_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

/// Open to everyone: hands out the session a login form needs.
pub fn create_auth_public_router() -> Router<Arc<AppState>> {
    Router::new().route("/getlogin", get(get_login_status))
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.auth.try_login(&payload.password).await?;

    // The pre-login session is replaced, never promoted.
    if let Some(previous) = session_id(&jar) {
        state.sessions.remove(&previous).await;
    }

    let jar = jar.add(session_cookie(
        session.id.clone(),
        state.server_config.secure_cookies,
    ));
    Ok((
        jar,
        Json(LoginResponse {
            csrf_token: session.csrf_token,
        }),
    ))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(id) = session_id(&jar) {
        state.auth.logout(&id).await;
    }
    Ok((
        jar.remove(removal_cookie()),
        Json(MessageResponse::new("Logged out")),
    ))
}

async fn get_login_status(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(id) = session_id(&jar) {
        if let Some(session) = state.sessions.touch(&id).await {
            return Ok((
                jar,
                Json(LoginStatusResponse {
                    authenticated: session.authenticated,
                    csrf_token: session.csrf_token,
                }),
            ));
        }
    }

    let session = state.sessions.create_anonymous().await;
    let jar = jar.add(session_cookie(
        session.id.clone(),
        state.server_config.secure_cookies,
    ));
    Ok((
        jar,
        Json(LoginStatusResponse {
            authenticated: false,
            csrf_token: session.csrf_token,
        }),
    ))
}
