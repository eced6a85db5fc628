use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::data::session_store::SessionStore;
use crate::web::error::AppError;

/// Checks the per-session CSRF token on every mutating request.
///
/// The token is minted with the session and never rotated, so several tabs
/// and in-flight requests can share it.
pub struct CsrfGuard {
    sessions: Arc<SessionStore>,
}

impl CsrfGuard {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    pub async fn token_for(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).await.map(|s| s.csrf_token)
    }

    pub async fn validate(
        &self,
        session_id: Option<&str>,
        supplied: Option<&str>,
    ) -> Result<(), AppError> {
        let Some(session) = (match session_id {
            Some(id) => self.sessions.get(id).await,
            None => None,
        }) else {
            warn!("CSRF check without a live session");
            return Err(AppError::CsrfMismatch);
        };

        let supplied = supplied.unwrap_or_default();
        if supplied.is_empty() {
            return Err(AppError::CsrfMismatch);
        }
        if bool::from(session.csrf_token.as_bytes().ct_eq(supplied.as_bytes())) {
            Ok(())
        } else {
            warn!("CSRF token mismatch");
            Err(AppError::CsrfMismatch)
        }
    }
}
