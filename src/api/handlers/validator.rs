//! Per-field form validation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use super::auth::valid_email;

/// Field name to message; the first failure per field wins.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    /// Record `message` against `field` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add(field, message);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Reject with a custom status and summary, keeping the per-field detail.
    #[must_use]
    pub fn respond(self, status: StatusCode, error: impl Into<String>) -> Response {
        (
            status,
            Json(ValidationResponse {
                error: error.into(),
                field_errors: self,
            }),
        )
            .into_response()
    }

    /// `Ok(())` when nothing failed, otherwise the errors as a rejection.
    ///
    /// # Errors
    /// Returns `self` when at least one field failed.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidationResponse {
    pub error: String,
    pub field_errors: FieldErrors,
}

impl IntoResponse for FieldErrors {
    fn into_response(self) -> Response {
        self.respond(StatusCode::UNPROCESSABLE_ENTITY, "validation failed")
    }
}

pub fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

pub fn max_chars(value: &str, max: usize) -> bool {
    value.chars().count() <= max
}

pub fn min_chars(value: &str, min: usize) -> bool {
    value.chars().count() >= min
}

pub fn permitted_value<T: PartialEq>(value: &T, permitted: &[T]) -> bool {
    permitted.contains(value)
}

pub fn matches_email(value: &str) -> bool {
    valid_email(value)
}
