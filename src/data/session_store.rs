//! Ephemeral browser sessions keyed by an opaque identifier.
//!
//! Sessions are not persisted; a restart logs everyone out. Expired entries
//! are dropped lazily when they are looked up and whenever a session is created.
//! Anonymous sessions are handed out to anyone, so they expire sooner and
//! their number is capped: past the cap the least recently used one is evicted.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::data::secret::generate_token;

/// Random bytes in a CSRF token.
const CSRF_TOKEN_BYTES: usize = 32;

pub const DEFAULT_ANONYMOUS_IDLE_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(15 * 60);
pub const DEFAULT_MAX_ANONYMOUS_SESSIONS: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Issued once at creation and kept for the session's lifetime.
    pub csrf_token: String,
    pub authenticated: bool,
}

impl Session {
    fn new(authenticated: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            created_at: now,
            last_activity: now,
            csrf_token: generate_token(CSRF_TOKEN_BYTES),
            authenticated,
        }
    }

}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    idle_timeout: Duration,
    anonymous_idle_timeout: Duration,
    max_anonymous: usize,
}

impl SessionStore {
    pub fn new(idle_timeout: std::time::Duration) -> Self {
        let idle_timeout = Duration::from_std(idle_timeout).unwrap_or(Duration::MAX);
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
            anonymous_idle_timeout: Duration::from_std(DEFAULT_ANONYMOUS_IDLE_TIMEOUT)
                .unwrap_or(idle_timeout)
                .min(idle_timeout),
            max_anonymous: DEFAULT_MAX_ANONYMOUS_SESSIONS,
        }
    }

    /// Overrides the idle timeout and the cap of anonymous sessions.
    /// The timeout never exceeds the one of authenticated sessions.
    pub fn with_anonymous_limits(
        mut self,
        idle_timeout: std::time::Duration,
        max_sessions: usize,
    ) -> Self {
        self.anonymous_idle_timeout = Duration::from_std(idle_timeout)
            .unwrap_or(Duration::MAX)
            .min(self.idle_timeout);
        self.max_anonymous = max_sessions.max(1);
        self
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let timeout = if session.authenticated {
            self.idle_timeout
        } else {
            self.anonymous_idle_timeout
        };
        now - session.last_activity > timeout
    }

    /// Creates an anonymous session for a browser that has none yet.
    pub async fn create_anonymous(&self) -> Session {
        self.insert(Session::new(false)).await
    }

    pub async fn create_authenticated(&self) -> Session {
        self.insert(Session::new(true)).await
    }

    async fn insert(&self, session: Session) -> Session {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s, now));
        if sessions.len() != before {
            debug!(removed = before - sessions.len(), "Collected expired sessions");
        }

        if !session.authenticated {
            let mut anonymous: Vec<(DateTime<Utc>, String)> = sessions
                .values()
                .filter(|s| !s.authenticated)
                .map(|s| (s.last_activity, s.id.clone()))
                .collect();
            if anonymous.len() >= self.max_anonymous {
                let excess = anonymous.len() + 1 - self.max_anonymous;
                anonymous.sort_unstable();
                for (_, id) in anonymous.into_iter().take(excess) {
                    sessions.remove(&id);
                }
                debug!(evicted = excess, "Evicted least recently used anonymous sessions");
            }
        }

        sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Returns the live session and refreshes its activity time.
    pub async fn touch(&self, id: &str) -> Option<Session> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let expired = self.is_expired(sessions.get(id)?, now);
        if expired {
            sessions.remove(id);
            return None;
        }
        let session = sessions.get_mut(id)?;
        session.last_activity = now;
        Some(session.clone())
    }

    /// Returns the live session without refreshing it.
    pub async fn get(&self, id: &str) -> Option<Session> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .filter(|s| !self.is_expired(s, now))
            .cloned()
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn age(&self, id: &str, by: Duration) {
        if let Some(s) = self.sessions.write().await.get_mut(id) {
            s.last_activity -= by;
        }
    }
}
