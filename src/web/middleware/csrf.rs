use axum::{
    body::Body as AxumBody,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use crate::web::{AppState, CSRF_HEADER, error::AppError, session_id};

/// Runs before any side effect of a mutating request.
pub async fn csrf(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let supplied = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok());
    state
        .csrf
        .validate(session_id(&jar).as_deref(), supplied)
        .await?;
    Ok(next.run(req).await)
}
