//! Auth handlers and supporting modules.
//!
//! This module owns credentials (Argon2id hashes in `users`), server-side
//! sessions (`sessions`, keyed by token hash) and the request pipeline that
//! binds them to each request.
//!
//! ## Request Pipeline
//!
//! [`session_pipeline`] wraps every route:
//!
//! - **Session attach:** the `snippetbox_session` cookie is resolved to a
//!   [`Session`] handle; unknown or expired tokens start a fresh session.
//! - **CSRF:** methods other than `GET`, `HEAD`, `OPTIONS` and `TRACE` need a token
//!   from [`Session::csrf_token`] in `X-CSRF-Token` or the `csrf_token` form field.
//! - **Auth context:** the session's user id is re-checked against `users` and
//!   exposed as [`AuthContext`].
//! - **Persist:** modified sessions are saved with a fresh expiry and the cookie
//!   is reissued; destroyed sessions are deleted and the cookie cleared.
//!
//! Protected routes add [`require_authentication`] as a route layer.
//!
//! > **Note:** Session tokens are renewed on login, logout and password change.

mod credentials;
mod csrf;
mod error;
pub mod memory;
mod password;
mod pipeline;
mod principal;
mod repository;
mod session;
mod state;
mod storage;
pub(crate) mod types;
pub(crate) mod users;
mod utils;

pub use credentials::CredentialStore;
pub use csrf::{CSRF_FORM_FIELD, CSRF_HEADER};
pub use error::{AuthError, ErrorResponse};
pub use pipeline::session_pipeline;
pub use principal::{require_authentication, AuthContext, CurrentUser};
pub use repository::{
    Identity, SessionRepository, SessionRow, StoreError, StoredCredentials, UserRepository,
    USERS_EMAIL_CONSTRAINT,
};
pub use session::{
    spawn_session_cleanup, Session, SessionData, SessionStore, SessionToken, SESSION_COOKIE_NAME,
};
pub use state::{AuthConfig, AuthState};
pub use storage::{PgSessionRepository, PgUserRepository};
pub(crate) use users::MIN_PASSWORD_CHARS;
pub(crate) use utils::{now_unix_seconds, valid_email};

#[cfg(test)]
mod tests;
