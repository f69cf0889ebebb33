//! Session token persistence.

use std::time::Duration;

use rand::RngCore;
use tracing::{debug, instrument};

use crate::store::{KvStore, StoreError, StoreResult};

/// Key prefix under which session tokens are stored.
pub const SESSION_PREFIX: &str = "session:";

/// Random bytes per token, hex encoded on the wire.
const TOKEN_BYTES: usize = 32;

fn session_key(token: &str) -> String {
    format!("{SESSION_PREFIX}{token}")
}

/// Mint an unguessable opaque token from the OS-seeded thread RNG.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Token to identity mapping with optional expiry.
///
/// Concurrent sessions for one identity are independent records; there is
/// no rotation and no per-identity cap.
#[derive(Debug, Clone)]
pub struct SessionStore {
    kv: KvStore,
}

impl SessionStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Create a session for `user_id`. `None` or a zero TTL never expires.
    #[instrument(skip(self))]
    pub async fn create(&self, user_id: &str, ttl: Option<Duration>) -> StoreResult<String> {
        let token = generate_token();
        self.kv
            .put(&session_key(&token), user_id.as_bytes(), ttl)
            .await?;
        debug!("created session");
        Ok(token)
    }

    /// Resolve a token to its identity.
    ///
    /// Unknown and expired tokens both yield [`StoreError::NotFound`].
    pub async fn resolve(&self, token: &str) -> StoreResult<String> {
        if token.is_empty() {
            return Err(StoreError::not_found("session"));
        }
        let value = self
            .kv
            .get(&session_key(token))
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => StoreError::not_found("session"),
                other => other,
            })?;
        String::from_utf8(value).map_err(|_| StoreError::not_found("session"))
    }

    /// Delete a session. Revoking an unknown token is not an error.
    #[instrument(skip(self, token))]
    pub async fn revoke(&self, token: &str) -> StoreResult<()> {
        let removed = self.kv.delete(&session_key(token)).await?;
        debug!(removed, "revoked session");
        Ok(())
    }

    /// Number of live sessions.
    pub async fn count(&self) -> StoreResult<usize> {
        self.kv.count_prefix(SESSION_PREFIX).await
    }

    /// Delete every live session, returning how many were removed.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> StoreResult<usize> {
        self.kv.delete_prefix(SESSION_PREFIX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn sessions() -> SessionStore {
        let db = Database::in_memory().await.unwrap();
        SessionStore::new(KvStore::new(db.pool().clone()))
    }

    #[test]
    fn test_tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_session_without_ttl_resolves_until_revoked() {
        let sessions = sessions().await;
        let token = sessions.create("u1", None).await.unwrap();
        assert_eq!(sessions.resolve(&token).await.unwrap(), "u1");

        let zero = sessions.create("u1", Some(Duration::ZERO)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sessions.resolve(&zero).await.unwrap(), "u1");

        sessions.revoke(&token).await.unwrap();
        assert!(sessions.resolve(&token).await.unwrap_err().is_not_found());
        assert_eq!(sessions.resolve(&zero).await.unwrap(), "u1");
    }

    #[tokio::test]
    async fn test_session_with_ttl_expires_like_missing() {
        let sessions = sessions().await;
        let token = sessions
            .create("u1", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(sessions.resolve(&token).await.unwrap(), "u1");

        tokio::time::sleep(Duration::from_millis(80)).await;

        let expired = sessions.resolve(&token).await.unwrap_err();
        let missing = sessions.resolve("no-such-token").await.unwrap_err();
        assert_eq!(expired.to_string(), missing.to_string());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let sessions = sessions().await;
        sessions.revoke("never-issued").await.unwrap();

        let token = sessions.create("u1", None).await.unwrap();
        sessions.revoke(&token).await.unwrap();
        sessions.revoke(&token).await.unwrap();
    }

    #[tokio::test]
    async fn test_sessions_for_one_identity_are_independent() {
        let sessions = sessions().await;
        let laptop = sessions.create("u1", None).await.unwrap();
        let phone = sessions.create("u1", None).await.unwrap();
        assert_eq!(sessions.count().await.unwrap(), 2);

        sessions.revoke(&laptop).await.unwrap();
        assert_eq!(sessions.resolve(&phone).await.unwrap(), "u1");
        assert_eq!(sessions.count().await.unwrap(), 1);

        assert_eq!(sessions.clear().await.unwrap(), 1);
        assert!(sessions.resolve(&phone).await.is_err());
    }
}
