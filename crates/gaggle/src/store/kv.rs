//! Ordered key-value records with optional per-key expiry.
//!
//! Everything durable (chat history, sessions, users) is stored as a record
//! in the `kv` table. Keys are plain strings compared bytewise, so a common
//! prefix groups records and a prefix range scan returns them in key order.
//! Expired records are invisible to every read and are removed by the
//! sweeper in the background.

use std::time::Duration;

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::error::{StoreError, StoreResult};

const UPSERT: &str = r#"
    INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
"#;

const SELECT_ONE: &str = r#"
    SELECT value FROM kv
    WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)
"#;

const SCAN_PREFIX: &str = r#"
    SELECT key, value FROM kv
    WHERE key >= ? AND (? IS NULL OR key < ?)
      AND (expires_at IS NULL OR expires_at > ?)
    ORDER BY key
"#;

const COUNT_PREFIX: &str = r#"
    SELECT COUNT(*) FROM kv
    WHERE key >= ? AND (? IS NULL OR key < ?)
      AND (expires_at IS NULL OR expires_at > ?)
"#;

const DELETE_PREFIX: &str = r#"
    DELETE FROM kv
    WHERE key >= ? AND (? IS NULL OR key < ?)
      AND (expires_at IS NULL OR expires_at > ?)
"#;

const DELETE_ONE: &str = "DELETE FROM kv WHERE key = ?";

const DELETE_EXPIRED: &str = "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?";

/// A live record returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
}

impl From<(String, Vec<u8>)> for Record {
    fn from((key, value): (String, Vec<u8>)) -> Self {
        Self { key, value }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Absolute expiry for a TTL; `None` and zero both mean "never".
fn expiry_from(ttl: Option<Duration>) -> Option<i64> {
    ttl.filter(|ttl| !ttl.is_zero()).map(|ttl| {
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_millis().saturating_add(millis)
    })
}

/// Smallest string greater than every string starting with `prefix`.
///
/// `None` when no such bound exists (empty prefix, or one made only of
/// `char::MAX`), in which case a scan is bounded below only.
pub(crate) fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Key-value store backed by the sqlite `kv` table.
#[derive(Debug, Clone)]
pub struct KvStore {
    pool: SqlitePool,
}

impl KvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a record. A zero or absent TTL never expires.
    #[instrument(skip(self, value))]
    pub async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(expiry_from(ttl))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a live record.
    pub async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        sqlx::query_scalar::<_, Vec<u8>>(SELECT_ONE)
            .bind(key)
            .bind(now_millis())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found(key))
    }

    /// Delete a record. Returns whether a row was removed.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query(DELETE_ONE)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every live record whose key starts with `prefix`, in key order.
    pub async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<Record>> {
        let upper = prefix_upper_bound(prefix);
        let rows = sqlx::query_as::<_, (String, Vec<u8>)>(SCAN_PREFIX)
            .bind(prefix)
            .bind(&upper)
            .bind(&upper)
            .bind(now_millis())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Record::from).collect())
    }

    /// Number of live records under `prefix`.
    pub async fn count_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let upper = prefix_upper_bound(prefix);
        let count = sqlx::query_scalar::<_, i64>(COUNT_PREFIX)
            .bind(prefix)
            .bind(&upper)
            .bind(&upper)
            .bind(now_millis())
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Delete every live record under `prefix` in one statement.
    #[instrument(skip(self))]
    pub async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let upper = prefix_upper_bound(prefix);
        let result = sqlx::query(DELETE_PREFIX)
            .bind(prefix)
            .bind(&upper)
            .bind(&upper)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Start a read-modify-write transaction.
    pub async fn begin(&self) -> StoreResult<KvTxn> {
        let tx = self.pool.begin().await?;
        Ok(KvTxn {
            tx,
            now: now_millis(),
        })
    }

    /// Physically remove expired records.
    pub async fn sweep_expired(&self) -> StoreResult<u64> {
        let result = sqlx::query(DELETE_EXPIRED)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `every` until the
    /// task is aborted.
    pub fn spawn_sweeper(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match self.sweep_expired().await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "swept expired records"),
                    Err(err) => warn!(error = %err, "expiry sweep failed"),
                }
            }
        })
    }
}

/// An open transaction over the `kv` table.
///
/// Dropping it without [`commit`](Self::commit) rolls back.
pub struct KvTxn {
    tx: Transaction<'static, Sqlite>,
    now: i64,
}

impl KvTxn {
    pub async fn scan_prefix(&mut self, prefix: &str) -> StoreResult<Vec<Record>> {
        let upper = prefix_upper_bound(prefix);
        let rows = sqlx::query_as::<_, (String, Vec<u8>)>(SCAN_PREFIX)
            .bind(prefix)
            .bind(&upper)
            .bind(&upper)
            .bind(self.now)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(Record::from).collect())
    }

    pub async fn put(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(expiry_from(ttl))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn delete(&mut self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query(DELETE_ONE)
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
