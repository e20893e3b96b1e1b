//! Signup, login and logout.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    error::{AuthError, ErrorResponse},
    principal::{AuthContext, CurrentUser},
    repository::Identity,
    session::Session,
    state::AuthState,
    types::{FormPage, LoginForm, LoginResponse, MessageResponse, PageContext, SignupForm},
};
use crate::api::handlers::validator::{
    matches_email, min_chars, not_blank, FieldErrors, ValidationResponse,
};

pub(crate) const MIN_PASSWORD_CHARS: usize = 8;

pub const FLASH_SIGNUP: &str = "Your signup was successful. Please log in.";
pub const FLASH_LOGOUT: &str = "You've been logged out successfully!";

#[utoipa::path(
    get,
    path = "/user/signup",
    responses((status = 200, description = "Signup form data", body = FormPage)),
    tag = "users"
)]
pub async fn signup_form(
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<FormPage>, AuthError> {
    Ok(Json(FormPage {
        page: PageContext::with_form(&session, &context)?,
    }))
}

#[utoipa::path(
    post,
    path = "/user/signup",
    request_body(content = SignupForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 201, description = "Identity created", body = Identity),
        (status = 403, description = "Missing or invalid CSRF token", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ValidationResponse),
        (status = 422, description = "Invalid form", body = ValidationResponse)
    ),
    tag = "users"
)]
pub async fn signup(
    Extension(auth): Extension<Arc<AuthState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<SignupForm>,
) -> Result<Response, AuthError> {
    let mut errors = FieldErrors::new();
    errors.check(not_blank(&form.name), "name", "This field cannot be blank");
    errors.check(not_blank(&form.email), "email", "This field cannot be blank");
    errors.check(
        matches_email(&form.email),
        "email",
        "This field must be a valid email address",
    );
    errors.check(not_blank(&form.password), "password", "This field cannot be blank");
    errors.check(
        min_chars(&form.password, MIN_PASSWORD_CHARS),
        "password",
        "This field must be at least 8 characters long",
    );
    if let Err(errors) = errors.into_result() {
        return Ok(errors.into_response());
    }

    let password = SecretString::from(form.password);
    match auth
        .credentials()
        .register(&form.name, &form.email, password)
        .await
    {
        Ok(identity) => {
            info!(user_id = identity.id, "user signed up");
            session.put_flash(FLASH_SIGNUP);
            Ok((StatusCode::CREATED, Json(identity)).into_response())
        }
        Err(AuthError::DuplicateIdentity) => {
            let mut errors = FieldErrors::new();
            errors.add("email", "Email address is already in use");
            Ok(errors.respond(
                StatusCode::CONFLICT,
                AuthError::DuplicateIdentity.to_string(),
            ))
        }
        Err(err) => Err(err),
    }
}

#[utoipa::path(
    get,
    path = "/user/login",
    responses((status = 200, description = "Login form data", body = FormPage)),
    tag = "users"
)]
pub async fn login_form(
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<FormPage>, AuthError> {
    Ok(Json(FormPage {
        page: PageContext::with_form(&session, &context)?,
    }))
}

#[utoipa::path(
    post,
    path = "/user/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Logged in; session token renewed", body = LoginResponse),
        (status = 403, description = "Missing or invalid CSRF token", body = ErrorResponse),
        (status = 422, description = "Invalid form or credentials", body = ErrorResponse)
    ),
    tag = "users"
)]
pub async fn login(
    Extension(auth): Extension<Arc<AuthState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AuthError> {
    let mut errors = FieldErrors::new();
    errors.check(not_blank(&form.email), "email", "This field cannot be blank");
    errors.check(
        matches_email(&form.email),
        "email",
        "This field must be a valid email address",
    );
    errors.check(not_blank(&form.password), "password", "This field cannot be blank");
    if let Err(errors) = errors.into_result() {
        return Ok(errors.into_response());
    }

    let user_id = auth
        .credentials()
        .authenticate(&form.email, SecretString::from(form.password))
        .await?;

    // New privilege level, new token.
    session.renew_token().await?;
    session.set_authenticated_user_id(user_id);
    info!(user_id, "user logged in");

    Ok(Json(LoginResponse { user_id }).into_response())
}

#[utoipa::path(
    post,
    path = "/user/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not logged in", body = ErrorResponse),
        (status = 403, description = "Missing or invalid CSRF token", body = ErrorResponse)
    ),
    tag = "users"
)]
pub async fn logout(
    CurrentUser(user_id): CurrentUser,
    Extension(session): Extension<Session>,
) -> Result<Json<MessageResponse>, AuthError> {
    session.renew_token().await?;
    session.clear_authenticated_user_id();
    session.put_flash(FLASH_LOGOUT);
    debug!(user_id, "user logged out");

    Ok(Json(MessageResponse {
        message: FLASH_LOGOUT.to_string(),
    }))
}
