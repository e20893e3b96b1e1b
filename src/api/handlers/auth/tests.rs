use super::{
    memory::{MemorySessionRepository, MemoryUserRepository},
    pipeline::issued_token,
    repository::{SessionRepository, SessionRow, StoreError, UserRepository},
    session_pipeline,
    utils::now_unix_seconds,
    require_authentication, AuthConfig, AuthContext, AuthError, AuthState, Session, SessionData,
    SessionToken, CSRF_HEADER,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Path,
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        Request as HttpRequest, StatusCode,
    },
    middleware::{from_fn, from_fn_with_state},
    response::Response,
    routing::{get, post},
    Extension, Router,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;
use tower::ServiceExt;

type Hits = Arc<AtomicUsize>;

struct Harness {
    auth: Arc<AuthState>,
    users: Arc<MemoryUserRepository>,
    sessions: Arc<MemorySessionRepository>,
    hits: Hits,
}

fn harness() -> Harness {
    let users = Arc::new(MemoryUserRepository::default());
    let sessions = Arc::new(MemorySessionRepository::default());
    let auth = Arc::new(AuthState::new(
        AuthConfig::new("https://snippetbox.dev".to_string()),
        users.clone(),
        sessions.clone(),
    ));
    Harness {
        auth,
        users,
        sessions,
        hits: Arc::new(AtomicUsize::new(0)),
    }
}

async fn nothing() -> &'static str {
    "ok"
}

async fn form(Extension(session): Extension<Session>) -> Result<String, AuthError> {
    session.csrf_token()
}

async fn peek(
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
) -> String {
    let user = context
        .current_user_id()
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    format!("{}|{user}", session.pop_flash().unwrap_or_default())
}

async fn flash(Extension(session): Extension<Session>, Extension(hits): Extension<Hits>) -> &'static str {
    hits.fetch_add(1, Ordering::SeqCst);
    session.put_flash("posted");
    "posted"
}

async fn login(
    Path(user_id): Path<i64>,
    Extension(session): Extension<Session>,
) -> Result<&'static str, AuthError> {
    session.renew_token().await?;
    session.set_authenticated_user_id(user_id);
    Ok("in")
}

async fn logout(Extension(session): Extension<Session>) -> &'static str {
    session.destroy();
    "out"
}

async fn panicking(Extension(session): Extension<Session>) -> &'static str {
    session.put_flash("kept");
    panic!("handler blew up")
}

async fn private() -> &'static str {
    "secret"
}

fn app(auth: Arc<AuthState>, hits: Hits) -> Router {
    Router::new()
        .route("/private", get(private))
        .route_layer(from_fn(require_authentication))
        .route("/nothing", get(nothing))
        .route("/form", get(form))
        .route("/peek", get(peek))
        .route("/flash", post(flash))
        .route("/login/:id", get(login))
        .route("/logout", get(logout))
        .route("/panic", get(panicking))
        .layer(from_fn_with_state(auth, session_pipeline))
        .layer(Extension(hits))
}

fn request(method: &str, uri: &str, token: Option<&SessionToken>) -> Result<HttpRequest<Body>> {
    let mut builder = HttpRequest::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(COOKIE, format!("snippetbox_session={}", token.as_str()));
    }
    Ok(builder.body(Body::empty())?)
}

async fn send(h: &Harness, req: HttpRequest<Body>) -> Result<Response> {
    Ok(app(h.auth.clone(), h.hits.clone()).oneshot(req).await?)
}

async fn body_text(response: Response) -> Result<String> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok().map(str::to_string))
        .collect()
}

/// Store a session for `user_id` directly, expiring `expires_in` seconds from now.
async fn seed_session(h: &Harness, user_id: i64, expires_in: i64) -> Result<SessionToken> {
    let store = h.auth.sessions();
    let token = store.new_token()?;
    let data = SessionData {
        authenticated_user_id: Some(user_id),
        ..SessionData::default()
    };
    store
        .save(&token, &data, now_unix_seconds() + expires_in)
        .await?;
    Ok(token)
}

/// GET /form and return the minted CSRF token plus the session it belongs to.
async fn csrf_session(h: &Harness) -> Result<(String, SessionToken)> {
    let response = send(h, request("GET", "/form", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let token = issued_token(&response).ok_or_else(|| anyhow!("no session cookie issued"))?;
    Ok((body_text(response).await?, token))
}

#[tokio::test]
async fn untouched_anonymous_request_writes_nothing() -> Result<()> {
    let h = harness();
    let response = send(&h, request("GET", "/nothing", None)?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert!(h.sessions.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn modified_session_is_saved_and_cookie_issued() -> Result<()> {
    let h = harness();
    let (_, token) = csrf_session(&h).await?;

    let cookies = set_cookies(&send(&h, request("GET", "/nothing", Some(&token))?).await?);
    assert!(cookies.is_empty(), "unchanged session must not reissue the cookie");

    let data = h.auth.sessions().load(&token).await?;
    assert!(data.is_some_and(|data| data.csrf_secret.is_some()));
    Ok(())
}

#[tokio::test]
async fn cookie_carries_security_attributes() -> Result<()> {
    let h = harness();
    let response = send(&h, request("GET", "/form", None)?).await?;
    let cookies = set_cookies(&response);

    assert_eq!(cookies.len(), 1);
    let cookie = &cookies[0];
    assert!(cookie.starts_with("snippetbox_session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=43200"));
    assert!(cookie.contains("Secure"));
    Ok(())
}

#[tokio::test]
async fn unsafe_request_without_token_is_rejected_before_the_handler() -> Result<()> {
    let h = harness();
    let (_, session) = csrf_session(&h).await?;
    let rows_before = h.sessions.len().await;

    let response = send(&h, request("POST", "/flash", Some(&session))?).await?;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.hits.load(Ordering::SeqCst), 0);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(h.sessions.len().await, rows_before);
    Ok(())
}

#[tokio::test]
async fn header_token_admits_unsafe_request() -> Result<()> {
    let h = harness();
    let (csrf, session) = csrf_session(&h).await?;

    let mut req = request("POST", "/flash", Some(&session))?;
    req.headers_mut().insert(CSRF_HEADER, csrf.parse()?);
    let response = send(&h, req).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.hits.load(Ordering::SeqCst), 1);

    let response = send(&h, request("GET", "/peek", Some(&session))?).await?;
    assert_eq!(body_text(response).await?, "posted|-");
    Ok(())
}

#[tokio::test]
async fn form_field_token_admits_unsafe_request() -> Result<()> {
    let h = harness();
    let (csrf, session) = csrf_session(&h).await?;

    let req = HttpRequest::builder()
        .method("POST")
        .uri("/flash")
        .header(COOKIE, format!("snippetbox_session={}", session.as_str()))
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("title=x&csrf_token={csrf}")))?;
    let response = send(&h, req).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn token_from_another_session_is_rejected() -> Result<()> {
    let h = harness();
    let (foreign_csrf, _) = csrf_session(&h).await?;
    let (_, session) = csrf_session(&h).await?;

    let mut req = request("POST", "/flash", Some(&session))?;
    req.headers_mut().insert(CSRF_HEADER, foreign_csrf.parse()?);
    let response = send(&h, req).await?;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn session_without_secret_rejects_any_token() -> Result<()> {
    let h = harness();
    let (csrf, _) = csrf_session(&h).await?;

    let mut req = request("POST", "/flash", None)?;
    req.headers_mut().insert(CSRF_HEADER, csrf.parse()?);
    let response = send(&h, req).await?;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn unknown_cookie_value_is_never_adopted() -> Result<()> {
    let h = harness();
    let planted = SessionToken::from("attacker-chosen-token".to_string());

    let response = send(&h, request("GET", "/form", Some(&planted))?).await?;

    let issued = issued_token(&response).ok_or_else(|| anyhow!("no session cookie issued"))?;
    assert_ne!(issued.as_str(), planted.as_str());
    assert!(h.auth.sessions().load(&planted).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn panic_becomes_opaque_500_and_mutation_is_persisted() -> Result<()> {
    let h = harness();
    let response = send(&h, request("GET", "/panic", None)?).await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let token = issued_token(&response).ok_or_else(|| anyhow!("no session cookie issued"))?;
    let body = body_text(response).await?;
    assert!(body.contains("internal server error"));
    assert!(!body.contains("blew up"));

    let data = h.auth.sessions().load(&token).await?;
    assert_eq!(data.and_then(|data| data.flash).as_deref(), Some("kept"));
    Ok(())
}

#[tokio::test]
async fn login_renews_token_and_keeps_data() -> Result<()> {
    let h = harness();
    let (_, before) = csrf_session(&h).await?;

    let response = send(&h, request("GET", "/login/7", Some(&before))?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let after = issued_token(&response).ok_or_else(|| anyhow!("no session cookie issued"))?;

    assert_ne!(after.as_str(), before.as_str());
    assert!(h.auth.sessions().load(&before).await?.is_none());
    let data = h
        .auth
        .sessions()
        .load(&after)
        .await?
        .ok_or_else(|| anyhow!("renewed session missing"))?;
    assert_eq!(data.authenticated_user_id, Some(7));
    assert!(data.csrf_secret.is_some());
    Ok(())
}

#[tokio::test]
async fn expired_session_is_anonymous() -> Result<()> {
    let h = harness();
    let user_id = h.users.insert("liakos", "a@b.com", "hash").await?;
    let token = seed_session(&h, user_id, -1).await?;

    let response = send(&h, request("GET", "/peek", Some(&token))?).await?;
    assert_eq!(body_text(response).await?, "|-");

    let response = send(&h, request("GET", "/private", Some(&token))?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn deleted_identity_loses_access_without_touching_the_session() -> Result<()> {
    let h = harness();
    let user_id = h.users.insert("liakos", "a@b.com", "hash").await?;
    let token = seed_session(&h, user_id, 600).await?;

    let response = send(&h, request("GET", "/private", Some(&token))?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await?, "secret");

    assert!(h.users.delete(user_id).await);

    let response = send(&h, request("GET", "/private", Some(&token))?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookies(&response).is_empty());

    let data = h.auth.sessions().load(&token).await?;
    assert_eq!(data.and_then(|data| data.authenticated_user_id), Some(user_id));
    Ok(())
}

#[tokio::test]
async fn destroy_deletes_record_and_clears_cookie() -> Result<()> {
    let h = harness();
    let token = seed_session(&h, 1, 600).await?;

    let response = send(&h, request("GET", "/logout", Some(&token))?).await?;

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("snippetbox_session=;"));
    assert!(cookies[0].contains("Max-Age=0"));
    assert!(h.sessions.is_empty().await);
    Ok(())
}

/// Session repository whose writes always fail; reads fail when asked to.
struct BrokenSessions {
    reads_fail: bool,
}

#[async_trait]
impl SessionRepository for BrokenSessions {
    async fn find(&self, _: &[u8], _: i64) -> Result<Option<SessionRow>, StoreError> {
        if self.reads_fail {
            Err(StoreError::Backend(anyhow!("connection refused")))
        } else {
            Ok(None)
        }
    }

    async fn upsert(&self, _: &[u8], _: &SessionRow) -> Result<(), StoreError> {
        Err(StoreError::Backend(anyhow!("connection refused")))
    }

    async fn delete(&self, _: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Backend(anyhow!("connection refused")))
    }

    async fn delete_expired(&self, _: i64) -> Result<u64, StoreError> {
        Err(StoreError::Backend(anyhow!("connection refused")))
    }
}

fn broken_app(reads_fail: bool) -> Router {
    let auth = Arc::new(AuthState::new(
        AuthConfig::new("http://localhost:8080".to_string()),
        Arc::new(MemoryUserRepository::default()),
        Arc::new(BrokenSessions { reads_fail }),
    ));
    app(auth, Arc::new(AtomicUsize::new(0)))
}

#[tokio::test]
async fn load_failure_is_an_opaque_500() -> Result<()> {
    let token = SessionToken::from("some-token".to_string());
    let response = broken_app(true)
        .oneshot(request("GET", "/nothing", Some(&token))?)
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body_text(response).await?.contains("connection refused"));
    Ok(())
}

#[tokio::test]
async fn request_without_cookie_never_reads_the_store() -> Result<()> {
    let response = broken_app(true)
        .oneshot(request("GET", "/nothing", None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn failed_save_keeps_response_but_issues_no_cookie() -> Result<()> {
    let response = broken_app(false)
        .oneshot(request("GET", "/form", None)?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert!(!body_text(response).await?.is_empty());
    Ok(())
}

async fn stalled(
    Extension(session): Extension<Session>,
    Extension(gate): Extension<Arc<Notify>>,
) -> &'static str {
    session.put_flash("written before the client left");
    gate.notified().await;
    "late"
}

#[tokio::test]
async fn client_disconnect_does_not_cancel_the_session_write() -> Result<()> {
    let h = harness();
    let gate = Arc::new(Notify::new());
    let router = Router::new()
        .route("/stall", get(stalled))
        .layer(from_fn_with_state(h.auth.clone(), session_pipeline))
        .layer(Extension(gate.clone()));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        router.oneshot(request("GET", "/stall", None)?),
    )
    .await;
    assert!(abandoned.is_err(), "handler should still be waiting");
    assert!(h.sessions.is_empty().await);

    gate.notify_one();
    for _ in 0..200 {
        if !h.sessions.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.sessions.len().await, 1);
    Ok(())
}

/// In-memory sessions behind a store that answers reads and writes late.
struct SlowSessions {
    inner: MemorySessionRepository,
    delay: Duration,
}

#[async_trait]
impl SessionRepository for SlowSessions {
    async fn find(&self, token_hash: &[u8], now_unix: i64) -> Result<Option<SessionRow>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find(token_hash, now_unix).await
    }

    async fn upsert(&self, token_hash: &[u8], row: &SessionRow) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(token_hash, row).await
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        self.inner.delete(token_hash).await
    }

    async fn delete_expired(&self, now_unix: i64) -> Result<u64, StoreError> {
        self.inner.delete_expired(now_unix).await
    }
}

fn slow_app() -> Router {
    let auth = Arc::new(AuthState::new(
        AuthConfig::new("http://localhost:8080".to_string()).with_session_store_timeout_seconds(1),
        Arc::new(MemoryUserRepository::default()),
        Arc::new(SlowSessions {
            inner: MemorySessionRepository::default(),
            delay: Duration::from_secs(3),
        }),
    ));
    app(auth, Arc::new(AtomicUsize::new(0)))
}

#[tokio::test]
async fn save_past_the_store_timeout_issues_no_cookie() -> Result<()> {
    let response = slow_app().oneshot(request("GET", "/form", None)?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert!(!body_text(response).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn load_past_the_store_timeout_is_an_opaque_500() -> Result<()> {
    let token = SessionToken::from("some-token".to_string());
    let response = tokio::time::timeout(
        Duration::from_secs(2),
        slow_app().oneshot(request("GET", "/nothing", Some(&token))?),
    )
    .await??;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookies(&response).is_empty());
    Ok(())
}
