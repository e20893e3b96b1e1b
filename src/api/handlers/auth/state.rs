//! Auth state and configuration shared by every request.

use std::sync::Arc;
use std::time::Duration;

use super::{
    credentials::CredentialStore,
    repository::{SessionRepository, UserRepository},
    session::SessionStore,
};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_SESSION_CLEANUP_SECONDS: u64 = 5 * 60;
const DEFAULT_SESSION_STORE_TIMEOUT_SECONDS: u64 = 5;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    session_ttl_seconds: i64,
    session_cleanup_seconds: u64,
    session_store_timeout_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            session_cleanup_seconds: DEFAULT_SESSION_CLEANUP_SECONDS,
            session_store_timeout_seconds: DEFAULT_SESSION_STORE_TIMEOUT_SECONDS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_cleanup_seconds(mut self, seconds: u64) -> Self {
        self.session_cleanup_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_store_timeout_seconds(mut self, seconds: u64) -> Self {
        self.session_store_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn session_cleanup_interval(&self) -> Duration {
        // A zero interval would spin the sweeper.
        Duration::from_secs(self.session_cleanup_seconds.max(1))
    }

    #[must_use]
    pub fn session_store_timeout(&self) -> Duration {
        Duration::from_secs(self.session_store_timeout_seconds)
    }

    /// Only mark cookies secure when the service is reached over HTTPS.
    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    credentials: CredentialStore,
    sessions: SessionStore,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        let sessions = SessionStore::new(sessions, config.session_ttl_seconds());
        Self {
            config,
            credentials: CredentialStore::new(users),
            sessions,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}
