//! Token persistence across runs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use super::AuthToken;
use crate::db::DbError;

/// Errors raised by a [`TokenStore`]. Storage failures only.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database access failed.
    #[error(transparent)]
    Database(#[from] DbError),

    /// A query failed.
    #[error("token query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// Stored token could not be (de)serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Stored payload is malformed.
    #[error("stored token payload is invalid")]
    InvalidPayload,

    /// Encryption failed.
    #[error("failed to encrypt token")]
    EncryptionFailed,

    /// Decryption failed (wrong key or tampered payload).
    #[error("failed to decrypt stored token")]
    DecryptionFailed,

    /// Store lock was poisoned by a panicking writer.
    #[error("token store lock poisoned")]
    Poisoned,
}

/// Persists one [`AuthToken`] per username.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Saves (or replaces) the token for `username`.
    async fn save(&self, username: &str, token: &AuthToken) -> Result<(), StoreError>;

    /// Loads the token for `username`, if one is stored.
    async fn load(&self, username: &str) -> Result<Option<AuthToken>, StoreError>;

    /// Deletes the token for `username`. Deleting a missing token is not an error.
    async fn delete(&self, username: &str) -> Result<(), StoreError>;
}

/// Process-local token store; tokens are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, AuthToken>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save(&self, username: &str, token: &AuthToken) -> Result<(), StoreError> {
        self.tokens
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(username.to_string(), token.clone());
        Ok(())
    }

    async fn load(&self, username: &str) -> Result<Option<AuthToken>, StoreError> {
        Ok(self
            .tokens
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(username)
            .cloned())
    }

    async fn delete(&self, username: &str) -> Result<(), StoreError> {
        self.tokens
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(username);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_save_load_delete() {
        let store = MemoryTokenStore::new();
        let token = AuthToken::from_grant("a".into(), "r".into(), 60);

        assert!(store.load("alice").await.unwrap().is_none());
        store.save("alice", &token).await.unwrap();
        assert_eq!(store.load("alice").await.unwrap(), Some(token));
        assert!(store.load("bob").await.unwrap().is_none());

        store.delete("alice").await.unwrap();
        assert!(store.load("alice").await.unwrap().is_none());
        store.delete("alice").await.unwrap();
    }
}
