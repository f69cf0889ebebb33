//! Chat message model and its storage key encoding.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hub::Identity;

/// Key prefix under which chat messages are stored.
pub const CHAT_PREFIX: &str = "chat:";

/// A single chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub message: String,
    /// Creation time in unix milliseconds.
    pub timestamp: i64,
}

impl ChatMessage {
    /// Create a message authored by `author` now.
    pub fn new(author: &Identity, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: author.user_id.clone(),
            username: author.username.clone(),
            message: content.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Total order used for history: timestamp, then id.
    pub fn chronological(a: &Self, b: &Self) -> Ordering {
        a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
    }

    pub(crate) fn storage_key(&self) -> String {
        chat_key(self.timestamp, &self.id)
    }
}

/// `chat:<timestamp>:<id>`, where the timestamp part sorts lexicographically.
pub(crate) fn chat_key(timestamp: i64, id: &str) -> String {
    format!("{CHAT_PREFIX}{}:{id}", format_timestamp(timestamp))
}

/// Fixed-width UTC rendering of a millisecond timestamp,
/// e.g. `20240102030405.678000000`.
///
/// Timestamps chrono cannot represent fall back to the zero-padded raw
/// value; readers re-sort scanned records, so placement stays correct.
pub(crate) fn format_timestamp(timestamp: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp) {
        Some(at) => at.format("%Y%m%d%H%M%S%.9f").to_string(),
        None => format!("{timestamp:024}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp_is_fixed_width() {
        assert_eq!(format_timestamp(0), "19700101000000.000000000");
        assert_eq!(
            format_timestamp(1_704_164_645_678),
            "20240102030405.678000000"
        );
        assert_eq!(
            format_timestamp(1_000).len(),
            format_timestamp(1_704_164_645_678).len()
        );
    }

    #[test]
    fn test_keys_sort_by_time() {
        let earlier = chat_key(1_000, "zzz");
        let later = chat_key(2_000, "aaa");
        assert!(earlier < later);
        assert!(earlier.starts_with(CHAT_PREFIX));
    }

    #[test]
    fn test_chronological_breaks_ties_by_id() {
        let author = Identity::new("u1", "alice");
        let mut a = ChatMessage::new(&author, "one");
        let mut b = ChatMessage::new(&author, "two");
        a.timestamp = 5;
        b.timestamp = 5;
        a.id = "a".into();
        b.id = "b".into();
        assert_eq!(ChatMessage::chronological(&a, &b), Ordering::Less);

        b.timestamp = 4;
        assert_eq!(ChatMessage::chronological(&a, &b), Ordering::Greater);
    }
}
