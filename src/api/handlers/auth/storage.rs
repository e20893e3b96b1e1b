//! PostgreSQL repositories for identities and sessions.
//!
//! Every statement runs inside a `db.query` span carrying the statement text.
//! Unique violations are reported with their constraint name so callers can
//! tell which invariant was hit without reading driver messages.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row};
use tracing::{info_span, Instrument};

use super::repository::{
    Identity, SessionRepository, SessionRow, StoreError, StoredCredentials, UserRepository,
};
use super::utils::unique_violation;

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn backend(err: sqlx::Error, context: &'static str) -> StoreError {
    StoreError::Backend(anyhow::Error::new(err).context(context))
}

#[derive(Clone, Debug)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn insert(
        &self,
        name: &str,
        email: &str,
        hashed_password: &str,
    ) -> Result<i64, StoreError> {
        let query = r"
            INSERT INTO users (name, email, hashed_password, created)
            VALUES ($1, $2, $3, NOW())
            RETURNING id
        ";
        let result = sqlx::query(query)
            .bind(name)
            .bind(email)
            .bind(hashed_password)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match result {
            Ok(row) => row
                .try_get::<i64, _>("id")
                .map_err(|err| backend(err, "failed to read inserted user id")),
            Err(err) => match unique_violation(&err) {
                Some(constraint) => Err(StoreError::UniqueViolation { constraint }),
                None => Err(backend(err, "failed to insert user")),
            },
        }
    }

    async fn credentials_by_email(&self, email: &str) -> Result<StoredCredentials, StoreError> {
        let query = "SELECT id, hashed_password FROM users WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| backend(err, "failed to look up credentials"))?
            .ok_or(StoreError::NotFound)?;

        Ok(StoredCredentials {
            user_id: row
                .try_get("id")
                .map_err(|err| backend(err, "failed to read user id"))?,
            hashed_password: row
                .try_get("hashed_password")
                .map_err(|err| backend(err, "failed to read password hash"))?,
        })
    }

    async fn hashed_password(&self, user_id: i64) -> Result<String, StoreError> {
        let query = "SELECT hashed_password FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| backend(err, "failed to load password hash"))?
            .ok_or(StoreError::NotFound)?;

        row.try_get("hashed_password")
            .map_err(|err| backend(err, "failed to read password hash"))
    }

    async fn update_password(&self, user_id: i64, hashed_password: &str) -> Result<(), StoreError> {
        let query = "UPDATE users SET hashed_password = $1 WHERE id = $2";
        let result = sqlx::query(query)
            .bind(hashed_password)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| backend(err, "failed to update password"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn exists(&self, user_id: i64) -> Result<bool, StoreError> {
        let query = "SELECT EXISTS (SELECT 1 FROM users WHERE id = $1) AS present";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| backend(err, "failed to check user liveness"))?;

        row.try_get("present")
            .map_err(|err| backend(err, "failed to read liveness flag"))
    }

    async fn get(&self, user_id: i64) -> Result<Identity, StoreError> {
        let query = r"
            SELECT id, name, email, EXTRACT(EPOCH FROM created)::BIGINT AS created_unix
            FROM users
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| backend(err, "failed to load user"))?
            .ok_or(StoreError::NotFound)?;

        let read = |err| backend(err, "failed to decode user row");
        Ok(Identity {
            id: row.try_get("id").map_err(read)?,
            name: row.try_get("name").map_err(read)?,
            email: row.try_get("email").map_err(read)?,
            created_unix: row.try_get("created_unix").map_err(read)?,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;

        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn find(
        &self,
        token_hash: &[u8],
        now_unix: i64,
    ) -> Result<Option<SessionRow>, StoreError> {
        let query = r"
            SELECT data::text AS data, EXTRACT(EPOCH FROM expiry)::BIGINT AS expiry_unix
            FROM sessions
            WHERE token_hash = $1
              AND expiry > to_timestamp($2)
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now_unix)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| backend(err, "failed to load session"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let read = |err| backend(err, "failed to decode session row");
        Ok(Some(SessionRow {
            data: row.try_get("data").map_err(read)?,
            expiry_unix: row.try_get("expiry_unix").map_err(read)?,
        }))
    }

    async fn upsert(&self, token_hash: &[u8], row: &SessionRow) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO sessions (token_hash, data, expiry)
            VALUES ($1, $2::jsonb, to_timestamp($3))
            ON CONFLICT (token_hash)
            DO UPDATE SET data = EXCLUDED.data, expiry = EXCLUDED.expiry
        ";
        sqlx::query(query)
            .bind(token_hash)
            .bind(&row.data)
            .bind(row.expiry_unix)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| backend(err, "failed to save session"))?;
        Ok(())
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| backend(err, "failed to delete session"))?;
        Ok(())
    }

    async fn delete_expired(&self, now_unix: i64) -> Result<u64, StoreError> {
        let query = "DELETE FROM sessions WHERE expiry <= to_timestamp($1)";
        let result = sqlx::query(query)
            .bind(now_unix)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| backend(err, "failed to delete expired sessions"))?;
        Ok(result.rows_affected())
    }
}
