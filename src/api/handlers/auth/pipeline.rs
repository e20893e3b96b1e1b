//! The per-request session pipeline.
//!
//! Stages, in order: attach the session, check CSRF on unsafe methods, resolve
//! the authentication context, run the inner service (route layers such as
//! [`super::principal::require_authentication`] included), then persist the
//! session. Persist runs on every exit path. The inner service runs in its own
//! task so a panic becomes an opaque `500`, and the handler plus persist unit is
//! detached from the connection so a client disconnect cannot cancel the write.

use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use anyhow::anyhow;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, warn, Instrument};

use super::{
    csrf,
    error::{internal_error_response, AuthError},
    principal::AuthContext,
    session::{
        clear_session_cookie, extract_session_token, session_cookie, Session, SessionChange,
        SessionToken,
    },
    state::AuthState,
};

/// axum middleware wiring the whole pipeline; install it with
/// `axum::middleware::from_fn_with_state`.
pub async fn session_pipeline(
    State(auth): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = extract_session_token(req.headers());
    let session = match attach_session(&auth, token).await {
        Ok(session) => session,
        Err(err) => return err.into_response(),
    };
    req.extensions_mut().insert(session.clone());

    let unit = tokio::spawn(
        async move {
            let response = guarded(&auth, &session, req, next).await;
            persist(&auth, &session, response).await
        }
        .in_current_span(),
    );

    match unit.await {
        Ok(response) => response,
        Err(err) => {
            error!("request task failed: {err}");
            internal_error_response()
        }
    }
}

/// Load the session named by the cookie; unknown or expired tokens start a
/// fresh session instead of adopting the client's value.
async fn attach_session(
    auth: &AuthState,
    token: Option<SessionToken>,
) -> Result<Session, AuthError> {
    let store = auth.sessions().clone();
    let Some(token) = token else {
        return Ok(Session::new(store, None));
    };
    let loaded = timeout(auth.config().session_store_timeout(), store.load(&token))
        .await
        .map_err(|_| AuthError::storage(anyhow!("session store timed out")))?;
    match loaded? {
        Some(data) => Ok(Session::new(store, Some((token, data)))),
        None => {
            debug!("session cookie did not match a live session");
            Ok(Session::new(store, None))
        }
    }
}

async fn guarded(auth: &AuthState, session: &Session, req: Request, next: Next) -> Response {
    let mut req = if csrf::requires_csrf(req.method()) {
        let (req, submitted) = csrf::submitted_token(req).await;
        let valid = match (session.csrf_secret(), submitted) {
            (Some(secret), Some(token)) => csrf::verify_token(&secret, &token),
            _ => false,
        };
        if !valid {
            warn!(method = %req.method(), path = %req.uri().path(), "CSRF check failed");
            return AuthError::Forbidden.into_response();
        }
        req
    } else {
        req
    };

    let context = match resolve_context(auth, session).await {
        Ok(context) => context,
        Err(err) => return err.into_response(),
    };
    req.extensions_mut().insert(context);

    match tokio::spawn(next.run(req).in_current_span()).await {
        Ok(response) => response,
        Err(err) => {
            error!("handler failed: {err}");
            internal_error_response()
        }
    }
}

/// The stored user id only counts while the identity still exists.
async fn resolve_context(auth: &AuthState, session: &Session) -> Result<AuthContext, AuthError> {
    let Some(user_id) = session.authenticated_user_id() else {
        return Ok(AuthContext::anonymous());
    };
    if auth.credentials().exists(user_id).await? {
        Ok(AuthContext::authenticated(user_id))
    } else {
        debug!(user_id, "session refers to a missing identity");
        Ok(AuthContext::anonymous())
    }
}

async fn persist(auth: &AuthState, session: &Session, mut response: Response) -> Response {
    let config = auth.config();
    let store = auth.sessions();
    let limit = config.session_store_timeout();

    match session.take_change() {
        SessionChange::Unchanged => {}
        SessionChange::Save {
            token,
            discarded,
            data,
        } => {
            let token = match token.map_or_else(|| store.new_token(), Ok) {
                Ok(token) => token,
                Err(err) => {
                    error!("session mutation lost: {err}");
                    return response;
                }
            };
            let write = async {
                if let Some(old) = &discarded {
                    store.destroy(old).await?;
                }
                store.save(&token, &data, store.expiry_from_now()).await?;
                Ok::<(), AuthError>(())
            };
            if store_call_succeeded(timeout(limit, write).await) {
                append_cookie(&mut response, session_cookie(config, &token));
            }
        }
        SessionChange::Destroy { discarded } => {
            let deleted = match &discarded {
                Some(old) => store_call_succeeded(timeout(limit, store.destroy(old)).await),
                None => true,
            };
            if deleted {
                append_cookie(&mut response, clear_session_cookie(config));
            }
        }
    }
    response
}

fn store_call_succeeded(
    result: Result<Result<(), AuthError>, tokio::time::error::Elapsed>,
) -> bool {
    match result {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("session mutation lost: {err}");
            false
        }
        Err(_) => {
            error!("session mutation lost: session store timed out");
            false
        }
    }
}

fn append_cookie(
    response: &mut Response,
    cookie: Result<axum::http::HeaderValue, axum::http::header::InvalidHeaderValue>,
) {
    match cookie {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(err) => error!("failed to build session cookie: {err}"),
    }
}

/// Token currently bound to a response, read back from its `Set-Cookie` header.
#[cfg(test)]
pub(crate) fn issued_token(response: &Response) -> Option<SessionToken> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.strip_prefix("snippetbox_session="))
        .filter_map(|value| value.split(';').next())
        .find(|value| !value.is_empty())
        .map(|value| SessionToken::from(value.to_string()))
}
