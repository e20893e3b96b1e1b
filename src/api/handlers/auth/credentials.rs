//! Credential store: registration, login verification, liveness checks and
//! password changes on top of a [`UserRepository`].
//!
//! Flow Overview:
//! - `register` hashes first, then inserts; a unique violation on
//!   `users_uc_email` becomes `DuplicateIdentity`.
//! - `authenticate` answers `InvalidCredentials` for both an unknown email and a
//!   wrong password, after the same amount of hashing work.
//! - Argon2 runs on the blocking pool so slow hashing never stalls request tasks.

use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{
    error::AuthError,
    password::{dummy_hash, hash_password, verify_password},
    repository::{Identity, StoreError, UserRepository, USERS_EMAIL_CONSTRAINT},
};

#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserRepository>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

impl CredentialStore {
    #[must_use]
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Register a new identity.
    ///
    /// # Errors
    /// `DuplicateIdentity` when the email is taken, `StorageFailure` otherwise.
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: SecretString,
    ) -> Result<Identity, AuthError> {
        let hashed_password = hash_blocking(password).await?;
        let user_id = match self.users.insert(name, email, &hashed_password).await {
            Ok(id) => id,
            Err(StoreError::UniqueViolation { constraint })
                if constraint == USERS_EMAIL_CONSTRAINT =>
            {
                return Err(AuthError::DuplicateIdentity);
            }
            Err(err) => return Err(AuthError::storage(err)),
        };
        debug!(user_id, "identity registered");
        self.fetch(user_id).await
    }

    /// Verify an email/password pair and return the user id.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown email or a wrong password.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: SecretString) -> Result<i64, AuthError> {
        let stored = match self.users.credentials_by_email(email).await {
            Ok(stored) => stored,
            Err(StoreError::NotFound) => {
                // Same hashing cost as a real mismatch; the verdict is discarded.
                let dummy = tokio::task::spawn_blocking(move || {
                    dummy_hash().map(|hash| verify_password(&password, hash))
                })
                .await;
                if let Err(err) = dummy {
                    warn!("dummy password verification did not run: {err}");
                }
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => return Err(AuthError::storage(err)),
        };

        if verify_blocking(password, stored.hashed_password).await? {
            Ok(stored.user_id)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Whether `user_id` still refers to a live identity.
    ///
    /// # Errors
    /// `StorageFailure` if the store cannot be queried.
    pub async fn exists(&self, user_id: i64) -> Result<bool, AuthError> {
        self.users.exists(user_id).await.map_err(AuthError::storage)
    }

    /// Re-verify the current password, then store a hash of the new one.
    ///
    /// # Errors
    /// `NotFound` if the identity is gone, `InvalidCredentials` on mismatch.
    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: SecretString,
        new_password: SecretString,
    ) -> Result<(), AuthError> {
        let stored = self.users.hashed_password(user_id).await.map_err(not_found)?;

        if !verify_blocking(current_password, stored).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let hashed_password = hash_blocking(new_password).await?;
        self.users
            .update_password(user_id, &hashed_password)
            .await
            .map_err(not_found)
    }

    /// Load an identity by id.
    ///
    /// # Errors
    /// `NotFound` if absent.
    pub async fn fetch(&self, user_id: i64) -> Result<Identity, AuthError> {
        self.users.get(user_id).await.map_err(not_found)
    }

    /// Storage connectivity check.
    ///
    /// # Errors
    /// `StorageFailure` when the store is unreachable.
    pub async fn ping(&self) -> Result<(), AuthError> {
        self.users.ping().await.map_err(AuthError::storage)
    }
}

fn not_found(err: StoreError) -> AuthError {
    match err {
        StoreError::NotFound => AuthError::NotFound,
        other => AuthError::storage(other),
    }
}

async fn hash_blocking(password: SecretString) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(AuthError::storage)?
        .map_err(AuthError::storage)
}

async fn verify_blocking(password: SecretString, hash: String) -> Result<bool, AuthError> {
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(AuthError::storage)?;
    verified.map_err(|err| {
        warn!("stored password hash could not be verified: {err}");
        AuthError::storage(err)
    })
}
