//! Server-side sessions: the durable store, the request-scoped handle and the
//! cookie that binds them.
//!
//! Flow Overview:
//! - The cookie carries an opaque token; the store is keyed by its SHA-256, so a
//!   leaked `sessions` table never leaks a live cookie.
//! - `SessionData` is serialized to JSON only at the store boundary.
//! - A fresh session has no token until something is written to it. Anonymous
//!   browsing therefore never creates rows.
//! - Handlers mutate a working copy through [`Session`]; the request pipeline
//!   turns the final state into a save, a delete or nothing.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::{
    csrf,
    error::AuthError,
    repository::{SessionRepository, SessionRow},
    state::AuthConfig,
    utils::{generate_session_token, hash_session_token, now_unix_seconds},
};

pub const SESSION_COOKIE_NAME: &str = "snippetbox_session";

/// Opaque bearer value of a session. `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn hash(&self) -> Vec<u8> {
        hash_session_token(&self.0)
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Everything a session remembers between requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<dyn SessionRepository>,
    ttl_seconds: i64,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionRepository>, ttl_seconds: i64) -> Self {
        Self {
            sessions,
            ttl_seconds,
        }
    }

    /// Absolute expiry for a record written now.
    #[must_use]
    pub fn expiry_from_now(&self) -> i64 {
        now_unix_seconds().saturating_add(self.ttl_seconds)
    }

    /// Load the data behind `token`. Unknown and expired tokens are absent.
    ///
    /// # Errors
    /// `StorageFailure` when the repository cannot be read.
    pub async fn load(&self, token: &SessionToken) -> Result<Option<SessionData>, AuthError> {
        let row = self
            .sessions
            .find(&token.hash(), now_unix_seconds())
            .await
            .map_err(AuthError::storage)?;
        let Some(row) = row else {
            return Ok(None);
        };
        match serde_json::from_str::<SessionData>(&row.data) {
            Ok(data) => Ok(Some(data)),
            Err(err) => {
                // An unreadable row is as good as no session.
                warn!("discarding unreadable session data: {err}");
                Ok(None)
            }
        }
    }

    /// Upsert the whole record under `token`.
    ///
    /// # Errors
    /// `StorageFailure` when serialization or the write fails.
    pub async fn save(
        &self,
        token: &SessionToken,
        data: &SessionData,
        expiry_unix: i64,
    ) -> Result<(), AuthError> {
        let row = SessionRow {
            data: serde_json::to_string(data).map_err(AuthError::storage)?,
            expiry_unix,
        };
        self.sessions
            .upsert(&token.hash(), &row)
            .await
            .map_err(AuthError::storage)
    }

    /// Mint a token that is not yet bound to any record.
    ///
    /// # Errors
    /// `StorageFailure` if the OS random source fails.
    pub fn new_token(&self) -> Result<SessionToken, AuthError> {
        generate_session_token()
            .map(SessionToken)
            .map_err(AuthError::storage)
    }

    /// Delete the record behind `token`; deleting twice is fine.
    ///
    /// # Errors
    /// `StorageFailure` when the delete fails.
    pub async fn destroy(&self, token: &SessionToken) -> Result<(), AuthError> {
        self.sessions
            .delete(&token.hash())
            .await
            .map_err(AuthError::storage)
    }

    /// Move the record behind `old` to a fresh token and invalidate `old`.
    ///
    /// # Errors
    /// `StorageFailure` when any of the underlying calls fail.
    pub async fn renew_token(&self, old: &SessionToken) -> Result<SessionToken, AuthError> {
        let new = self.new_token()?;
        if let Some(data) = self.load(old).await? {
            self.save(&new, &data, self.expiry_from_now()).await?;
        }
        self.destroy(old).await?;
        Ok(new)
    }

    /// Remove every expired record.
    ///
    /// # Errors
    /// `StorageFailure` when the delete fails.
    pub async fn delete_expired(&self) -> Result<u64, AuthError> {
        self.sessions
            .delete_expired(now_unix_seconds())
            .await
            .map_err(AuthError::storage)
    }
}

/// Periodically remove expired sessions so the table does not grow unbounded.
pub fn spawn_session_cleanup(
    store: SessionStore,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match store.delete_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "expired sessions removed"),
                Err(err) => error!("session cleanup failed: {err:#}"),
            }
        }
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Unchanged,
    Modified,
    Destroyed,
}

#[derive(Debug)]
struct SessionState {
    token: Option<SessionToken>,
    /// Token whose record must be deleted at persist time.
    discarded: Option<SessionToken>,
    data: SessionData,
    status: Status,
}

impl SessionState {
    fn touch(&mut self) {
        self.status = Status::Modified;
    }
}

/// What the pipeline has to do with a session once the handler is done.
#[derive(Debug)]
pub(crate) enum SessionChange {
    Unchanged,
    Save {
        token: Option<SessionToken>,
        discarded: Option<SessionToken>,
        data: SessionData,
    },
    Destroy {
        discarded: Option<SessionToken>,
    },
}

/// Request-scoped handle onto the session, available to handlers as an
/// `Extension<Session>`.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    store: SessionStore,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Wrap loaded data, or start an empty session when `loaded` is `None`.
    pub(crate) fn new(store: SessionStore, loaded: Option<(SessionToken, SessionData)>) -> Self {
        let (token, data) = match loaded {
            Some((token, data)) => (Some(token), data),
            None => (None, SessionData::default()),
        };
        Self {
            state: Arc::new(Mutex::new(SessionState {
                token,
                discarded: None,
                data,
                status: Status::Unchanged,
            })),
            store,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A panicking handler must not take the session down with it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn authenticated_user_id(&self) -> Option<i64> {
        self.lock().data.authenticated_user_id
    }

    pub fn set_authenticated_user_id(&self, user_id: i64) {
        let mut state = self.lock();
        state.data.authenticated_user_id = Some(user_id);
        state.touch();
    }

    pub fn clear_authenticated_user_id(&self) {
        let mut state = self.lock();
        if state.data.authenticated_user_id.take().is_some() {
            state.touch();
        }
    }

    pub fn put_flash(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.data.flash = Some(message.into());
        state.touch();
    }

    /// Read and clear the flash message.
    pub fn pop_flash(&self) -> Option<String> {
        let mut state = self.lock();
        let flash = state.data.flash.take();
        if flash.is_some() {
            state.touch();
        }
        flash
    }

    /// A fresh anti-forgery token for this session, creating the secret on first use.
    ///
    /// # Errors
    /// `StorageFailure` if the OS random source fails.
    pub fn csrf_token(&self) -> Result<String, AuthError> {
        let mut state = self.lock();
        let secret = match &state.data.csrf_secret {
            Some(secret) => secret.clone(),
            None => {
                let secret = csrf::generate_secret().map_err(AuthError::storage)?;
                state.data.csrf_secret = Some(secret.clone());
                state.touch();
                secret
            }
        };
        csrf::mint_token(&secret).map_err(AuthError::storage)
    }

    /// Like [`Session::csrf_token`] but never creates a secret, so the session
    /// stays untouched when it has none.
    ///
    /// # Errors
    /// `StorageFailure` if the OS random source fails.
    pub fn existing_csrf_token(&self) -> Result<Option<String>, AuthError> {
        self.csrf_secret()
            .map(|secret| csrf::mint_token(&secret).map_err(AuthError::storage))
            .transpose()
    }

    pub(crate) fn csrf_secret(&self) -> Option<String> {
        self.lock().data.csrf_secret.clone()
    }

    /// Replace the token while keeping the data, defeating session fixation.
    ///
    /// # Errors
    /// `StorageFailure` when the store cannot move the record.
    pub async fn renew_token(&self) -> Result<(), AuthError> {
        let old = self.lock().token.clone();
        let new = match &old {
            Some(old) => self.store.renew_token(old).await?,
            None => self.store.new_token()?,
        };
        let mut state = self.lock();
        state.token = Some(new);
        state.touch();
        Ok(())
    }

    /// Drop all data and delete the record at persist time. Writing to the
    /// session afterwards starts a new one under a new token.
    pub fn destroy(&self) {
        let mut state = self.lock();
        if let Some(token) = state.token.take() {
            state.discarded = Some(token);
        }
        state.data = SessionData::default();
        state.status = Status::Destroyed;
    }

    pub(crate) fn take_change(&self) -> SessionChange {
        let mut state = self.lock();
        let discarded = state.discarded.take();
        match state.status {
            Status::Unchanged => SessionChange::Unchanged,
            Status::Modified => SessionChange::Save {
                token: state.token.clone(),
                discarded,
                data: state.data.clone(),
            },
            Status::Destroyed => SessionChange::Destroy { discarded },
        }
    }
}

/// Build the `Set-Cookie` value carrying `token`.
pub(crate) fn session_cookie(
    config: &AuthConfig,
    token: &SessionToken,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}",
        token.as_str()
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<SessionToken> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().map(str::trim);
            let val = parts.next().map(str::trim);
            if let (Some(SESSION_COOKIE_NAME), Some(val)) = (key, val) {
                if !val.is_empty() {
                    return Some(SessionToken(val.to_string()));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::memory::MemorySessionRepository;

    fn store() -> (SessionStore, Arc<MemorySessionRepository>) {
        let repo = Arc::new(MemorySessionRepository::default());
        (SessionStore::new(repo.clone(), 3600), repo)
    }

    fn data(user_id: i64) -> SessionData {
        SessionData {
            authenticated_user_id: Some(user_id),
            ..SessionData::default()
        }
    }

    #[test]
    fn session_token_debug_is_redacted() {
        let token = SessionToken::from("super-secret-token".to_string());
        assert_eq!(format!("{token:?}"), "SessionToken(..)");
    }

    #[test]
    fn session_data_serializes_compactly() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&SessionData::default())?, "{}");
        let decoded: SessionData = serde_json::from_str(r#"{"authenticated_user_id":7}"#)?;
        assert_eq!(decoded, data(7));
        Ok(())
    }

    #[tokio::test]
    async fn save_then_load_round_trips() -> anyhow::Result<()> {
        let (store, _) = store();
        let token = store.new_token()?;
        assert_eq!(store.load(&token).await?, None);

        store.save(&token, &data(1), store.expiry_from_now()).await?;
        assert_eq!(store.load(&token).await?, Some(data(1)));

        store.save(&token, &data(2), store.expiry_from_now()).await?;
        assert_eq!(store.load(&token).await?, Some(data(2)));
        Ok(())
    }

    #[tokio::test]
    async fn expired_record_loads_as_absent() -> anyhow::Result<()> {
        let (store, repo) = store();
        let token = store.new_token()?;
        store.save(&token, &data(1), now_unix_seconds() - 1).await?;
        assert_eq!(store.load(&token).await?, None);

        assert_eq!(store.delete_expired().await?, 1);
        assert!(repo.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn renew_moves_data_and_invalidates_old_token() -> anyhow::Result<()> {
        let (store, repo) = store();
        let old = store.new_token()?;
        store.save(&old, &data(9), store.expiry_from_now()).await?;

        let new = store.renew_token(&old).await?;
        assert_ne!(old, new);
        assert_eq!(store.load(&old).await?, None);
        assert_eq!(store.load(&new).await?, Some(data(9)));
        assert_eq!(repo.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn destroy_is_idempotent() -> anyhow::Result<()> {
        let (store, _) = store();
        let token = store.new_token()?;
        store.save(&token, &data(1), store.expiry_from_now()).await?;
        store.destroy(&token).await?;
        store.destroy(&token).await?;
        assert_eq!(store.load(&token).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_row_is_treated_as_absent() -> anyhow::Result<()> {
        let (store, repo) = store();
        let token = store.new_token()?;
        repo.upsert(
            &token.hash(),
            &SessionRow {
                data: "not json".to_string(),
                expiry_unix: store.expiry_from_now(),
            },
        )
        .await?;
        assert_eq!(store.load(&token).await?, None);
        Ok(())
    }

    #[test]
    fn untouched_session_needs_no_write() {
        let (store, _) = store();
        let session = Session::new(store, None);
        assert_eq!(session.authenticated_user_id(), None);
        assert_eq!(session.pop_flash(), None);
        assert!(matches!(session.take_change(), SessionChange::Unchanged));
    }

    #[test]
    fn flash_is_popped_once() {
        let (store, _) = store();
        let session = Session::new(store, None);
        session.put_flash("saved");
        assert_eq!(session.pop_flash().as_deref(), Some("saved"));
        assert_eq!(session.pop_flash(), None);
    }

    #[test]
    fn csrf_secret_is_created_once() -> anyhow::Result<()> {
        let (store, _) = store();
        let session = Session::new(store, None);
        let first = session.csrf_token()?;
        let secret = session.csrf_secret();
        let second = session.csrf_token()?;
        assert_eq!(session.csrf_secret(), secret);
        let secret = secret.ok_or_else(|| anyhow::anyhow!("secret missing"))?;
        assert!(csrf::verify_token(&secret, &first));
        assert!(csrf::verify_token(&secret, &second));
        assert!(matches!(session.take_change(), SessionChange::Save { .. }));
        Ok(())
    }

    #[test]
    fn existing_token_leaves_a_fresh_session_untouched() -> anyhow::Result<()> {
        let (store, _) = store();
        let session = Session::new(store, None);
        assert!(session.existing_csrf_token()?.is_none());
        assert!(matches!(session.take_change(), SessionChange::Unchanged));

        session.csrf_token()?;
        let token = session
            .existing_csrf_token()?
            .ok_or_else(|| anyhow::anyhow!("token missing"))?;
        let secret = session
            .csrf_secret()
            .ok_or_else(|| anyhow::anyhow!("secret missing"))?;
        assert!(csrf::verify_token(&secret, &token));
        Ok(())
    }

    #[tokio::test]
    async fn renew_on_fresh_session_mints_a_token() -> anyhow::Result<()> {
        let (store, repo) = store();
        let session = Session::new(store, None);
        session.renew_token().await?;
        session.set_authenticated_user_id(3);
        match session.take_change() {
            SessionChange::Save {
                token,
                discarded,
                data,
            } => {
                assert!(token.is_some());
                assert!(discarded.is_none());
                assert_eq!(data.authenticated_user_id, Some(3));
            }
            other => anyhow::bail!("unexpected change: {other:?}"),
        }
        assert!(repo.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn destroy_discards_the_loaded_token() -> anyhow::Result<()> {
        let (store, _) = store();
        let token = store.new_token()?;
        let session = Session::new(store, Some((token.clone(), data(4))));
        session.destroy();
        assert_eq!(session.authenticated_user_id(), None);
        match session.take_change() {
            SessionChange::Destroy { discarded } => assert_eq!(discarded, Some(token)),
            other => anyhow::bail!("unexpected change: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn cookie_flags_follow_base_url() -> anyhow::Result<()> {
        let token = SessionToken::from("abc".to_string());
        let secure = AuthConfig::new("https://snippetbox.dev".to_string());
        let cookie = session_cookie(&secure, &token)?;
        assert_eq!(
            cookie.to_str()?,
            "snippetbox_session=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=43200; Secure"
        );

        let plain = AuthConfig::new("http://localhost:8080".to_string());
        let cleared = clear_session_cookie(&plain)?;
        assert_eq!(
            cleared.to_str()?,
            "snippetbox_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
        );
        Ok(())
    }

    #[test]
    fn extract_session_token_reads_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; snippetbox_session=tok123; other=1"),
        );
        assert_eq!(
            extract_session_token(&headers),
            Some(SessionToken::from("tok123".to_string()))
        );

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("snippetbox_session="));
        assert_eq!(extract_session_token(&headers), None);
        assert_eq!(extract_session_token(&HeaderMap::new()), None);
    }
}
