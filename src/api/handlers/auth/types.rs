//! Request/response types for auth endpoints.
//!
//! Forms arrive as `application/x-www-form-urlencoded`, like the HTML forms
//! they stand in for; a `csrf_token` field is accepted and ignored here because
//! the pipeline has already checked it. Password fields never appear in
//! `Debug` output.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{error::AuthError, principal::AuthContext, repository::Identity, session::Session};

const REDACTED: &str = "[redacted]";

#[derive(ToSchema, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for SignupForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignupForm")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &REDACTED)
            .finish()
    }
}

#[derive(ToSchema, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("email", &self.email)
            .field("password", &REDACTED)
            .finish()
    }
}

#[derive(ToSchema, Deserialize)]
pub struct PasswordUpdateForm {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub new_password_confirmation: String,
}

impl std::fmt::Debug for PasswordUpdateForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordUpdateForm")
            .field("current_password", &REDACTED)
            .field("new_password", &REDACTED)
            .field("new_password_confirmation", &REDACTED)
            .finish()
    }
}

/// Data every page needs: the anti-forgery token for its forms, a pending
/// flash message and whether the caller is logged in.
///
/// `csrf_token` is absent on read-only pages for visitors that have no CSRF
/// secret yet; rendering such a page must not create a session.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PageContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
    pub is_authenticated: bool,
}

impl PageContext {
    /// Context for a read-only page, consuming any flash message. Logged-in
    /// callers always get a token for the logout form.
    ///
    /// # Errors
    /// `StorageFailure` if a CSRF secret cannot be generated.
    pub fn new(session: &Session, auth: &AuthContext) -> Result<Self, AuthError> {
        if auth.is_authenticated() {
            return Self::with_form(session, auth);
        }
        Ok(Self {
            csrf_token: session.existing_csrf_token()?,
            flash: session.pop_flash(),
            is_authenticated: false,
        })
    }

    /// Context for a page carrying a form; creates the CSRF secret if needed.
    ///
    /// # Errors
    /// `StorageFailure` if a CSRF secret cannot be generated.
    pub fn with_form(session: &Session, auth: &AuthContext) -> Result<Self, AuthError> {
        Ok(Self {
            csrf_token: Some(session.csrf_token()?),
            flash: session.pop_flash(),
            is_authenticated: auth.is_authenticated(),
        })
    }
}

#[derive(ToSchema, Serialize, Debug)]
pub struct FormPage {
    #[serde(flatten)]
    pub page: PageContext,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct AccountResponse {
    #[serde(flatten)]
    pub page: PageContext,
    pub user: Identity,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginResponse {
    pub user_id: i64,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}
