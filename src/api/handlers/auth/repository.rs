//! Storage seams for identities and sessions.
//!
//! The relational store reports constraint violations as a typed
//! [`StoreError::UniqueViolation`] carrying the constraint name, so callers never
//! inspect driver error text.

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

/// Unique constraint guarding `users.email`.
pub const USERS_EMAIL_CONSTRAINT: &str = "users_uc_email";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
    #[error("no matching record found")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A registered user. The password hash never leaves the credential store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_unix: i64,
}

/// Id and stored PHC hash, used only for verification.
#[derive(Clone, Debug)]
pub struct StoredCredentials {
    pub user_id: i64,
    pub hashed_password: String,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user and return its id. Fails with `UniqueViolation` on a duplicate email.
    async fn insert(&self, name: &str, email: &str, hashed_password: &str)
        -> Result<i64, StoreError>;

    async fn credentials_by_email(&self, email: &str) -> Result<StoredCredentials, StoreError>;

    async fn hashed_password(&self, user_id: i64) -> Result<String, StoreError>;

    /// Replace the stored hash; `NotFound` when no row was updated.
    async fn update_password(&self, user_id: i64, hashed_password: &str)
        -> Result<(), StoreError>;

    async fn exists(&self, user_id: i64) -> Result<bool, StoreError>;

    async fn get(&self, user_id: i64) -> Result<Identity, StoreError>;

    /// Connectivity check for `/health`.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// A persisted session row: serialized data plus absolute expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRow {
    pub data: String,
    pub expiry_unix: i64,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Fetch an unexpired row by token hash.
    async fn find(&self, token_hash: &[u8], now_unix: i64)
        -> Result<Option<SessionRow>, StoreError>;

    /// Atomic upsert; replaces the whole row.
    async fn upsert(&self, token_hash: &[u8], row: &SessionRow) -> Result<(), StoreError>;

    /// Idempotent delete.
    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError>;

    /// Remove every row expired at `now_unix`, returning how many were removed.
    async fn delete_expired(&self, now_unix: i64) -> Result<u64, StoreError>;
}
