use bcrypt::verify;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::data::config_store::ConfigurationStore;
use crate::data::session_store::{Session, SessionStore};
use crate::web::error::AppError;

/// Password login and session state.
///
/// `Unauthenticated -> Authenticated -> (logout | expiry) -> Unauthenticated`.
/// Failed logins are not counted anywhere; every attempt instead takes at
/// least `min_latency` to answer.
pub struct AuthManager {
    config: Arc<ConfigurationStore>,
    sessions: Arc<SessionStore>,
    min_latency: Duration,
}

impl AuthManager {
    pub fn new(
        config: Arc<ConfigurationStore>,
        sessions: Arc<SessionStore>,
        min_latency: Duration,
    ) -> Self {
        Self {
            config,
            sessions,
            min_latency,
        }
    }

    /// Creates a new authenticated session when `password` matches.
    pub async fn try_login(&self, password: &str) -> Result<Session, AppError> {
        let started = Instant::now();
        let result = self.check_password(password).await;
        tokio::time::sleep_until(started + self.min_latency).await;

        match result {
            Ok(()) => {
                let session = self.sessions.create_authenticated().await;
                info!("Login succeeded");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                Err(e)
            }
        }
    }

    async fn check_password(&self, password: &str) -> Result<(), AppError> {
        if password.is_empty() {
            return Err(AppError::InvalidCredentials);
        }
        // Before setup there is nothing to log in with.
        let Some(password_hash) = self.config.snapshot().await.password_hash else {
            return Err(AppError::InvalidCredentials);
        };
        let valid = verify(password, &password_hash)
            .map_err(|e| AppError::InternalServerError(format!("password verification failed: {e}")))?;
        if valid {
            Ok(())
        } else {
            Err(AppError::InvalidCredentials)
        }
    }

    /// True iff the session exists, is unexpired, was not logged out and
    /// belongs to a logged-in browser. Refreshes its idle timer.
    pub async fn is_authenticated(&self, session_id: &str) -> bool {
        self.sessions
            .touch(session_id)
            .await
            .is_some_and(|s| s.authenticated)
    }

    /// Like [`AuthManager::is_authenticated`] but says why not.
    pub async fn require_authenticated(&self, session_id: Option<&str>) -> Result<Session, AppError> {
        let session_id = session_id.ok_or(AppError::SessionExpired)?;
        let session = self
            .sessions
            .touch(session_id)
            .await
            .ok_or(AppError::SessionExpired)?;
        if !session.authenticated {
            return Err(AppError::InvalidCredentials);
        }
        Ok(session)
    }

    /// Destroys the session. Unknown or already destroyed sessions are fine.
    pub async fn logout(&self, session_id: &str) {
        if self.sessions.remove(session_id).await {
            info!("Session logged out");
        }
    }
}
