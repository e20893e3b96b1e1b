//! Error taxonomy shared by the credential store, the session store and the
//! request pipeline.
//!
//! `InvalidCredentials`, `DuplicateIdentity` and `NotFound` are expected outcomes
//! that handlers turn into form errors. `Forbidden` and `Unauthorized` are
//! produced by the pipeline before a handler runs. `StorageFailure` is logged
//! with its full cause chain and reaches the client as an opaque `500`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("email or password is incorrect")]
    InvalidCredentials,
    #[error("email address is already in use")]
    DuplicateIdentity,
    #[error("no matching record found")]
    NotFound,
    #[error("request rejected by CSRF protection")]
    Forbidden,
    #[error("authentication required")]
    Unauthorized,
    #[error("storage failure: {0:#}")]
    StorageFailure(#[source] anyhow::Error),
}

impl AuthError {
    pub(crate) fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::StorageFailure(err.into())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DuplicateIdentity => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body for every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// Opaque `500` used for storage failures and caught panics.
pub(crate) fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::StorageFailure(err) = &self {
            // Full context stays server-side.
            error!("storage failure: {err:?}");
            return internal_error_response();
        }
        let status = self.status();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
