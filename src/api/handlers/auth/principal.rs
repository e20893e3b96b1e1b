//! Request-scoped authentication state and the access-control gate.
//!
//! The pipeline resolves an [`AuthContext`] once per request; handlers read it
//! through `Extension<AuthContext>` or require a user via [`CurrentUser`].

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{header::CACHE_CONTROL, request::Parts, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::error::AuthError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuthContext {
    user_id: Option<i64>,
}

impl AuthContext {
    #[must_use]
    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    #[must_use]
    pub fn authenticated(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    #[must_use]
    pub fn current_user_id(&self) -> Option<i64> {
        self.user_id
    }
}

/// The authenticated user id, or `401` when the request is anonymous.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .and_then(AuthContext::current_user_id)
            .map(CurrentUser)
            .ok_or(AuthError::Unauthorized)
    }
}

/// Route layer for protected routes: deny anonymous requests before the
/// handler runs, and keep authenticated pages out of shared caches.
pub async fn require_authentication(req: Request, next: Next) -> Response {
    let authenticated = req
        .extensions()
        .get::<AuthContext>()
        .is_some_and(AuthContext::is_authenticated);
    if !authenticated {
        return AuthError::Unauthorized.into_response();
    }

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
