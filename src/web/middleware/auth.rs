use axum::{
    body::Body as AxumBody,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use tracing::debug;

use crate::web::{AppState, error::AppError, session_id};

/// Rejects requests without a logged-in session and hands the session to the
/// handler as an extension.
pub async fn auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let session = state
        .auth
        .require_authenticated(session_id(&jar).as_deref())
        .await
        .inspect_err(|e| debug!(path = %req.uri().path(), error = %e, "Unauthenticated request"))?;

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
