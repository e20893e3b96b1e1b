use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};

use super::repository::{Snippet, SnippetRepository, LATEST_LIMIT};
use crate::api::handlers::auth::StoreError;

#[derive(Clone, Debug)]
pub struct PgSnippetRepository {
    pool: PgPool,
}

impl PgSnippetRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(row: &PgRow) -> Result<Snippet, StoreError> {
    Ok(Snippet {
        id: row.try_get("id").context("failed to read snippet id")?,
        title: row.try_get("title").context("failed to read snippet title")?,
        content: row
            .try_get("content")
            .context("failed to read snippet content")?,
        created_unix: row
            .try_get("created_unix")
            .context("failed to read snippet created")?,
        expires_unix: row
            .try_get("expires_unix")
            .context("failed to read snippet expires")?,
    })
}

#[async_trait]
impl SnippetRepository for PgSnippetRepository {
    async fn insert(
        &self,
        title: &str,
        content: &str,
        expires_days: i32,
    ) -> Result<i64, StoreError> {
        let query = r"
            INSERT INTO snippets (title, content, created, expires)
            VALUES ($1, $2, NOW(), NOW() + make_interval(days => $3))
            RETURNING id
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(title)
            .bind(content)
            .bind(expires_days)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert snippet")?;

        Ok(row.try_get("id").context("failed to read snippet id")?)
    }

    async fn get(&self, id: i64) -> Result<Snippet, StoreError> {
        let query = r"
            SELECT id, title, content,
                   EXTRACT(EPOCH FROM created)::BIGINT AS created_unix,
                   EXTRACT(EPOCH FROM expires)::BIGINT AS expires_unix
            FROM snippets
            WHERE expires > NOW() AND id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load snippet")?
            .ok_or(StoreError::NotFound)?;

        decode(&row)
    }

    async fn latest(&self) -> Result<Vec<Snippet>, StoreError> {
        let query = r"
            SELECT id, title, content,
                   EXTRACT(EPOCH FROM created)::BIGINT AS created_unix,
                   EXTRACT(EPOCH FROM expires)::BIGINT AS expires_unix
            FROM snippets
            WHERE expires > NOW()
            ORDER BY id DESC
            LIMIT $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(i64::try_from(LATEST_LIMIT).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load latest snippets")?;

        rows.iter().map(decode).collect()
    }
}
