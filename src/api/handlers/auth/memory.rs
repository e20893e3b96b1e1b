//! In-memory repositories for tests and local development.
//!
//! They honour the same contracts as the PostgreSQL implementations: unique
//! emails surface as `UniqueViolation { constraint: "users_uc_email" }`, and
//! expired sessions are invisible to `find`.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::repository::{
    Identity, SessionRepository, SessionRow, StoreError, StoredCredentials, UserRepository,
    USERS_EMAIL_CONSTRAINT,
};
use super::utils::now_unix_seconds;

#[derive(Clone, Debug)]
struct UserRow {
    identity: Identity,
    hashed_password: String,
}

#[derive(Debug, Default)]
struct Users {
    next_id: i64,
    rows: HashMap<i64, UserRow>,
}

#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: RwLock<Users>,
}

impl MemoryUserRepository {
    /// Remove an identity out-of-band (the service itself never deletes users).
    pub async fn delete(&self, user_id: i64) -> bool {
        self.users.write().await.rows.remove(&user_id).is_some()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn insert(
        &self,
        name: &str,
        email: &str,
        hashed_password: &str,
    ) -> Result<i64, StoreError> {
        let mut users = self.users.write().await;
        if users.rows.values().any(|row| row.identity.email == email) {
            return Err(StoreError::UniqueViolation {
                constraint: USERS_EMAIL_CONSTRAINT.to_string(),
            });
        }
        users.next_id += 1;
        let id = users.next_id;
        users.rows.insert(
            id,
            UserRow {
                identity: Identity {
                    id,
                    name: name.to_string(),
                    email: email.to_string(),
                    created_unix: now_unix_seconds(),
                },
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(id)
    }

    async fn credentials_by_email(&self, email: &str) -> Result<StoredCredentials, StoreError> {
        let users = self.users.read().await;
        users
            .rows
            .values()
            .find(|row| row.identity.email == email)
            .map(|row| StoredCredentials {
                user_id: row.identity.id,
                hashed_password: row.hashed_password.clone(),
            })
            .ok_or(StoreError::NotFound)
    }

    async fn hashed_password(&self, user_id: i64) -> Result<String, StoreError> {
        let users = self.users.read().await;
        users
            .rows
            .get(&user_id)
            .map(|row| row.hashed_password.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update_password(&self, user_id: i64, hashed_password: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let row = users.rows.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        row.hashed_password = hashed_password.to_string();
        Ok(())
    }

    async fn exists(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.users.read().await.rows.contains_key(&user_id))
    }

    async fn get(&self, user_id: i64) -> Result<Identity, StoreError> {
        let users = self.users.read().await;
        users
            .rows
            .get(&user_id)
            .map(|row| row.identity.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    rows: RwLock<HashMap<Vec<u8>, SessionRow>>,
}

impl MemorySessionRepository {
    /// Number of stored rows, expired ones included.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn find(
        &self,
        token_hash: &[u8],
        now_unix: i64,
    ) -> Result<Option<SessionRow>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(token_hash)
            .filter(|row| row.expiry_unix > now_unix)
            .cloned())
    }

    async fn upsert(&self, token_hash: &[u8], row: &SessionRow) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .insert(token_hash.to_vec(), row.clone());
        Ok(())
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        self.rows.write().await.remove(token_hash);
        Ok(())
    }

    async fn delete_expired(&self, now_unix: i64) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| row.expiry_unix > now_unix);
        Ok(u64::try_from(before - rows.len()).unwrap_or(u64::MAX))
    }
}
