//! In-memory snippet repository for tests and local development.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::repository::{Snippet, SnippetRepository, LATEST_LIMIT};
use crate::api::handlers::auth::{now_unix_seconds, StoreError};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Default)]
pub struct MemorySnippetRepository {
    snippets: RwLock<BTreeMap<i64, Snippet>>,
}

impl MemorySnippetRepository {
    pub async fn count(&self) -> usize {
        self.snippets.read().await.len()
    }
}

#[async_trait]
impl SnippetRepository for MemorySnippetRepository {
    async fn insert(
        &self,
        title: &str,
        content: &str,
        expires_days: i32,
    ) -> Result<i64, StoreError> {
        let mut snippets = self.snippets.write().await;
        let id = snippets.keys().next_back().copied().unwrap_or(0) + 1;
        let created_unix = now_unix_seconds();
        snippets.insert(
            id,
            Snippet {
                id,
                title: title.to_string(),
                content: content.to_string(),
                created_unix,
                expires_unix: created_unix + i64::from(expires_days) * SECONDS_PER_DAY,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Snippet, StoreError> {
        let now = now_unix_seconds();
        self.snippets
            .read()
            .await
            .get(&id)
            .filter(|snippet| snippet.expires_unix > now)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn latest(&self) -> Result<Vec<Snippet>, StoreError> {
        let now = now_unix_seconds();
        Ok(self
            .snippets
            .read()
            .await
            .values()
            .rev()
            .filter(|snippet| snippet.expires_unix > now)
            .take(LATEST_LIMIT)
            .cloned()
            .collect())
    }
}
