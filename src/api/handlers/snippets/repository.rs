//! Snippet storage seam.

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::handlers::auth::StoreError;

/// How many snippets the home page lists.
pub const LATEST_LIMIT: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Snippet {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_unix: i64,
    pub expires_unix: i64,
}

#[async_trait]
pub trait SnippetRepository: Send + Sync {
    /// Store a snippet that expires `expires_days` from now and return its id.
    async fn insert(&self, title: &str, content: &str, expires_days: i32)
        -> Result<i64, StoreError>;

    /// A live snippet; `NotFound` when missing or expired.
    async fn get(&self, id: i64) -> Result<Snippet, StoreError>;

    /// The most recent live snippets, newest first.
    async fn latest(&self) -> Result<Vec<Snippet>, StoreError>;
}
