//! Snippet pages: the public listing and viewer, and the protected create form.

pub mod memory;
mod repository;
mod storage;

pub use repository::{Snippet, SnippetRepository, LATEST_LIMIT};
pub use storage::PgSnippetRepository;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::auth::{
    types::{FormPage, PageContext},
    AuthContext, AuthError, ErrorResponse, Session, StoreError,
};
use super::validator::{max_chars, not_blank, permitted_value, FieldErrors, ValidationResponse};

pub const FLASH_SNIPPET_CREATED: &str = "Snippet successfully created!";

const TITLE_MAX_CHARS: usize = 100;
const PERMITTED_EXPIRES_DAYS: [i32; 3] = [1, 7, 365];
const DEFAULT_EXPIRES_DAYS: i32 = 365;

/// Shared handle used by the snippet handlers.
pub type Snippets = Arc<dyn SnippetRepository>;

#[derive(ToSchema, Serialize, Debug)]
pub struct HomeResponse {
    #[serde(flatten)]
    pub page: PageContext,
    pub snippets: Vec<Snippet>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct SnippetResponse {
    #[serde(flatten)]
    pub page: PageContext,
    pub snippet: Snippet,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct SnippetFormPage {
    #[serde(flatten)]
    pub page: PageContext,
    pub expires: i32,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct SnippetForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub expires: i32,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct SnippetCreated {
    pub id: i64,
}

fn store_error(err: StoreError) -> AuthError {
    match err {
        StoreError::NotFound => AuthError::NotFound,
        other => AuthError::storage(other),
    }
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Latest snippets", body = HomeResponse)),
    tag = "snippets"
)]
pub async fn home(
    Extension(snippets): Extension<Snippets>,
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<HomeResponse>, AuthError> {
    let snippets = snippets.latest().await.map_err(store_error)?;
    Ok(Json(HomeResponse {
        page: PageContext::new(&session, &context)?,
        snippets,
    }))
}

#[utoipa::path(
    get,
    path = "/snippet/view/{id}",
    params(("id" = i64, Path, description = "Snippet id")),
    responses(
        (status = 200, description = "Snippet", body = SnippetResponse),
        (status = 404, description = "Missing or expired snippet", body = ErrorResponse)
    ),
    tag = "snippets"
)]
pub async fn view(
    Path(id): Path<String>,
    Extension(snippets): Extension<Snippets>,
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<SnippetResponse>, AuthError> {
    let id = id
        .parse::<i64>()
        .ok()
        .filter(|id| *id >= 1)
        .ok_or(AuthError::NotFound)?;
    let snippet = snippets.get(id).await.map_err(store_error)?;
    Ok(Json(SnippetResponse {
        page: PageContext::new(&session, &context)?,
        snippet,
    }))
}

#[utoipa::path(
    get,
    path = "/about",
    responses((status = 200, description = "About page data", body = FormPage)),
    tag = "snippets"
)]
pub async fn about(
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<FormPage>, AuthError> {
    Ok(Json(FormPage {
        page: PageContext::new(&session, &context)?,
    }))
}

#[utoipa::path(
    get,
    path = "/snippet/create",
    responses(
        (status = 200, description = "Create form data", body = SnippetFormPage),
        (status = 401, description = "Not logged in", body = ErrorResponse)
    ),
    tag = "snippets"
)]
pub async fn create_form(
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<SnippetFormPage>, AuthError> {
    Ok(Json(SnippetFormPage {
        page: PageContext::with_form(&session, &context)?,
        expires: DEFAULT_EXPIRES_DAYS,
    }))
}

#[utoipa::path(
    post,
    path = "/snippet/create",
    request_body(content = SnippetForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 201, description = "Snippet created", body = SnippetCreated),
        (status = 401, description = "Not logged in", body = ErrorResponse),
        (status = 403, description = "Missing or invalid CSRF token", body = ErrorResponse),
        (status = 422, description = "Invalid form", body = ValidationResponse)
    ),
    tag = "snippets"
)]
pub async fn create(
    Extension(snippets): Extension<Snippets>,
    Extension(session): Extension<Session>,
    Form(form): Form<SnippetForm>,
) -> Result<Response, AuthError> {
    let mut errors = FieldErrors::new();
    errors.check(not_blank(&form.title), "title", "This field cannot be blank");
    errors.check(
        max_chars(&form.title, TITLE_MAX_CHARS),
        "title",
        "This field cannot be more than 100 characters long",
    );
    errors.check(not_blank(&form.content), "content", "This field cannot be blank");
    errors.check(
        permitted_value(&form.expires, &PERMITTED_EXPIRES_DAYS),
        "expires",
        "This field must equal 1, 7 or 365",
    );
    if let Err(errors) = errors.into_result() {
        return Ok(errors.into_response());
    }

    let id = snippets
        .insert(&form.title, &form.content, form.expires)
        .await
        .map_err(store_error)?;
    session.put_flash(FLASH_SNIPPET_CREATED);
    info!(snippet_id = id, "snippet created");

    Ok((StatusCode::CREATED, Json(SnippetCreated { id })).into_response())
}
