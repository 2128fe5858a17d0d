//! SQLite-backed token store with encryption at rest.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::secrets::{KEY_LEN, decrypt_bytes, derive_key_bytes, encrypt_bytes};
use super::{AuthToken, StoreError, TokenStore};
use crate::db::Database;

/// Persists tokens in the `tokens` table, sealed with a key derived from
/// caller-supplied key material.
pub struct SqliteTokenStore {
    db: Database,
    key: [u8; KEY_LEN],
}

impl SqliteTokenStore {
    /// Creates a store over `db`, encrypting payloads with `key_material`.
    #[must_use]
    pub fn new(db: Database, key_material: &str) -> Self {
        Self {
            db,
            key: derive_key_bytes(key_material),
        }
    }
}

impl std::fmt::Debug for SqliteTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTokenStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    #[instrument(skip(self, token))]
    async fn save(&self, username: &str, token: &AuthToken) -> Result<(), StoreError> {
        let payload = encrypt_bytes(&serde_json::to_vec(token)?, &self.key)?;
        sqlx::query(
            "INSERT INTO tokens (username, payload, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(username) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(username)
        .bind(payload)
        .execute(self.db.pool())
        .await?;
        debug!("token saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, username: &str) -> Result<Option<AuthToken>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT payload FROM tokens WHERE username = ?")
            .bind(username)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some((payload,)) => {
                let plain = decrypt_bytes(&payload, &self.key)?;
                Ok(Some(serde_json::from_slice(&plain)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, username: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tokens WHERE username = ?")
            .bind(username)
            .execute(self.db.pool())
            .await?;
        debug!("token deleted");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_store_roundtrip_and_replace() {
        let db = Database::new_in_memory().await.unwrap();
        let store = SqliteTokenStore::new(db, "key material");

        let first = AuthToken::from_grant("a1".into(), "r1".into(), 60);
        let second = AuthToken::from_grant("a2".into(), "r2".into(), 60);
        store.save("alice", &first).await.unwrap();
        store.save("alice", &second).await.unwrap();

        assert_eq!(store.load("alice").await.unwrap(), Some(second));
        store.delete("alice").await.unwrap();
        assert!(store.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payload_is_not_plaintext() {
        let db = Database::new_in_memory().await.unwrap();
        let store = SqliteTokenStore::new(db.clone(), "key material");
        store
            .save("alice", &AuthToken::from_grant("visible-token".into(), String::new(), 0))
            .await
            .unwrap();

        let (payload,): (Vec<u8>,) = sqlx::query_as("SELECT payload FROM tokens")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert!(!payload.windows(13).any(|w| w == b"visible-token"));
    }

    #[tokio::test]
    async fn test_wrong_key_fails_to_load() {
        let db = Database::new_in_memory().await.unwrap();
        SqliteTokenStore::new(db.clone(), "right")
            .save("alice", &AuthToken::from_grant("a".into(), "r".into(), 60))
            .await
            .unwrap();

        let result = SqliteTokenStore::new(db, "wrong").load("alice").await;
        assert!(matches!(result, Err(StoreError::DecryptionFailed)));
    }
}
