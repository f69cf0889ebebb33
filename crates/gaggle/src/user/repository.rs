//! User profile persistence.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::hub::Identity;
use crate::store::{KvStore, StoreError, StoreResult};

/// Key prefix under which user profiles are stored.
pub const USER_PREFIX: &str = "user:";

/// A user as last seen at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity::new(self.id.clone(), self.username.clone())
    }
}

fn user_key(id: &str) -> String {
    format!("{USER_PREFIX}{id}")
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    kv: KvStore,
}

impl UserRepository {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Insert or refresh a user profile.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn upsert(&self, user: &User) -> StoreResult<()> {
        let key = user_key(&user.id);
        let value = serde_json::to_vec(user).map_err(|source| StoreError::Codec {
            key: key.clone(),
            source,
        })?;
        self.kv.put(&key, &value, None).await
    }

    pub async fn get(&self, id: &str) -> StoreResult<User> {
        let key = user_key(id);
        let value = self.kv.get(&key).await.map_err(|err| match err {
            StoreError::NotFound(_) => StoreError::not_found(format!("user {id}")),
            other => other,
        })?;
        serde_json::from_slice(&value).map_err(|source| StoreError::Codec { key, source })
    }
}
