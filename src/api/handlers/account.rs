//! Account page and password change for the logged-in user.

use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    Form, Json,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

use super::auth::{
    types::{AccountResponse, FormPage, MessageResponse, PageContext, PasswordUpdateForm},
    AuthContext, AuthError, AuthState, CurrentUser, ErrorResponse, Session, MIN_PASSWORD_CHARS,
};
use super::validator::{min_chars, not_blank, FieldErrors, ValidationResponse};

pub const FLASH_PASSWORD_UPDATED: &str = "Your password has been updated!";

#[utoipa::path(
    get,
    path = "/account/view",
    responses(
        (status = 200, description = "Account details", body = AccountResponse),
        (status = 401, description = "Not logged in", body = ErrorResponse)
    ),
    tag = "account"
)]
pub async fn view(
    CurrentUser(user_id): CurrentUser,
    Extension(auth): Extension<Arc<AuthState>>,
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<AccountResponse>, AuthError> {
    let user = auth.credentials().fetch(user_id).await?;
    Ok(Json(AccountResponse {
        page: PageContext::new(&session, &context)?,
        user,
    }))
}

#[utoipa::path(
    get,
    path = "/account/password/update",
    responses(
        (status = 200, description = "Password form data", body = FormPage),
        (status = 401, description = "Not logged in", body = ErrorResponse)
    ),
    tag = "account"
)]
pub async fn password_form(
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<FormPage>, AuthError> {
    Ok(Json(FormPage {
        page: PageContext::with_form(&session, &context)?,
    }))
}

#[utoipa::path(
    post,
    path = "/account/password/update",
    request_body(content = PasswordUpdateForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Password changed; session token renewed", body = MessageResponse),
        (status = 401, description = "Not logged in", body = ErrorResponse),
        (status = 403, description = "Missing or invalid CSRF token", body = ErrorResponse),
        (status = 422, description = "Invalid form or wrong current password", body = ValidationResponse)
    ),
    tag = "account"
)]
pub async fn update_password(
    CurrentUser(user_id): CurrentUser,
    Extension(auth): Extension<Arc<AuthState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<PasswordUpdateForm>,
) -> Result<Response, AuthError> {
    let mut errors = FieldErrors::new();
    errors.check(
        not_blank(&form.current_password),
        "current_password",
        "This field cannot be blank",
    );
    errors.check(
        not_blank(&form.new_password),
        "new_password",
        "This field cannot be blank",
    );
    errors.check(
        min_chars(&form.new_password, MIN_PASSWORD_CHARS),
        "new_password",
        "This field must be at least 8 characters long",
    );
    errors.check(
        not_blank(&form.new_password_confirmation),
        "new_password_confirmation",
        "This field cannot be blank",
    );
    errors.check(
        form.new_password == form.new_password_confirmation,
        "new_password_confirmation",
        "Passwords do not match",
    );
    if let Err(errors) = errors.into_result() {
        return Ok(errors.into_response());
    }

    let changed = auth
        .credentials()
        .change_password(
            user_id,
            SecretString::from(form.current_password),
            SecretString::from(form.new_password),
        )
        .await;
    match changed {
        Ok(()) => {}
        Err(AuthError::InvalidCredentials) => {
            let mut errors = FieldErrors::new();
            errors.add("current_password", "Current password is incorrect");
            return Ok(errors.into_response());
        }
        Err(err) => return Err(err),
    }

    session.renew_token().await?;
    session.put_flash(FLASH_PASSWORD_UPDATED);
    info!(user_id, "password updated");

    Ok(Json(MessageResponse {
        message: FLASH_PASSWORD_UPDATED.to_string(),
    })
    .into_response())
}
