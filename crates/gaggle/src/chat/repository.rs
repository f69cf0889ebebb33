//! Chat history repository.

use std::time::Duration;

use tracing::{debug, instrument};

use super::models::{CHAT_PREFIX, ChatMessage};
use crate::store::{KvStore, Record, StoreError, StoreResult};

/// Attempts at a delete before a busy database is reported.
const DELETE_ATTEMPTS: u32 = 5;

/// Durable chat transcript.
#[derive(Debug, Clone)]
pub struct ChatRepository {
    kv: KvStore,
}

fn decode(record: &Record) -> StoreResult<ChatMessage> {
    serde_json::from_slice(&record.value).map_err(|source| StoreError::Codec {
        key: record.key.clone(),
        source,
    })
}

impl ChatRepository {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Persist a message.
    #[instrument(skip(self, message), fields(id = %message.id))]
    pub async fn add(&self, message: &ChatMessage) -> StoreResult<()> {
        let key = message.storage_key();
        let value = serde_json::to_vec(message).map_err(|source| StoreError::Codec {
            key: key.clone(),
            source,
        })?;
        self.kv.put(&key, &value, None).await
    }

    /// The most recent `limit` messages in ascending order.
    ///
    /// `None` or `Some(0)` returns the whole history. The scan already comes
    /// back in key order, but the result is re-sorted by (timestamp, id)
    /// anyway: key order and numeric order only agree while every timestamp
    /// formats to the same width.
    pub async fn list(&self, limit: Option<usize>) -> StoreResult<Vec<ChatMessage>> {
        let records = self.kv.scan_prefix(CHAT_PREFIX).await?;
        let mut messages = records
            .iter()
            .map(decode)
            .collect::<StoreResult<Vec<_>>>()?;

        messages.sort_by(ChatMessage::chronological);

        if let Some(limit) = limit.filter(|limit| *limit > 0) {
            if messages.len() > limit {
                messages.drain(..messages.len() - limit);
            }
        }

        Ok(messages)
    }

    /// Delete the message with `id`.
    ///
    /// Ids are not part of any index, so this scans the history inside one
    /// transaction. The scan pins a read snapshot; if another writer commits
    /// before the delete, the transaction is retried from a fresh snapshot.
    /// Fails with [`StoreError::NotFound`] when nothing matches.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut attempt = 1;
        loop {
            match self.delete_once(id).await {
                Err(err) if err.is_busy() && attempt < DELETE_ATTEMPTS => {
                    debug!(attempt, "chat delete lost a write race, retrying");
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn delete_once(&self, id: &str) -> StoreResult<()> {
        let mut txn = self.kv.begin().await?;
        for record in txn.scan_prefix(CHAT_PREFIX).await? {
            if decode(&record)?.id == id {
                txn.delete(&record.key).await?;
                txn.commit().await?;
                debug!("deleted chat message");
                return Ok(());
            }
        }
        Err(StoreError::not_found(format!("message {id}")))
    }

    /// Delete every message, returning how many were removed.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> StoreResult<usize> {
        self.kv.delete_prefix(CHAT_PREFIX).await
    }

    /// Number of stored messages.
    pub async fn count(&self) -> StoreResult<usize> {
        self.kv.count_prefix(CHAT_PREFIX).await
    }
}
