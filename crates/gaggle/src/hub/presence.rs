//! Reference-counted online roster.

use std::collections::HashMap;

use super::types::{DEFAULT_STATUS, Identity, PresenceEntry, StatusUpdate};

/// One roster entry per identity with at least one live connection.
///
/// Counts are kept beside the roster rather than derived from the
/// connection list so that leaving is O(1).
#[derive(Debug, Default)]
pub struct PresenceAggregator {
    counts: HashMap<String, usize>,
    roster: HashMap<String, PresenceEntry>,
}

impl PresenceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new connection. Returns true for the identity's first one.
    pub fn join(&mut self, identity: &Identity, now: i64) -> bool {
        let count = self.counts.entry(identity.user_id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return false;
        }
        self.roster.insert(
            identity.user_id.clone(),
            PresenceEntry {
                user_id: identity.user_id.clone(),
                username: identity.username.clone(),
                status: DEFAULT_STATUS.to_string(),
                app: None,
                updated_at: now,
            },
        );
        true
    }

    /// Drop one connection. Returns true when the identity went offline.
    ///
    /// Leaving for an identity that is not online is a no-op.
    pub fn leave(&mut self, user_id: &str) -> bool {
        let Some(count) = self.counts.get_mut(user_id) else {
            return false;
        };
        *count -= 1;
        if *count > 0 {
            return false;
        }
        self.counts.remove(user_id);
        self.roster.remove(user_id);
        true
    }

    /// Overwrite status and app for an online identity.
    ///
    /// Returns false, changing nothing, when the identity is offline.
    pub fn apply_status(&mut self, update: StatusUpdate, now: i64) -> bool {
        let Some(entry) = self.roster.get_mut(&update.user_id) else {
            return false;
        };
        entry.status = update.status;
        entry.app = update.app;
        entry.updated_at = now;
        true
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.roster.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.roster.len()
    }

    /// Snapshot of the roster ordered by username, then user id.
    pub fn roster(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self.roster.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.username
                .cmp(&b.username)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        entries
    }

    /// Online usernames in roster order.
    pub fn usernames(&self) -> Vec<String> {
        self.roster().into_iter().map(|entry| entry.username).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn alice() -> Identity {
        Identity::new("u1", "alice")
    }

    #[test]
    fn test_two_connections_one_entry() {
        let mut presence = PresenceAggregator::new();
        assert!(presence.join(&alice(), 1));
        assert!(!presence.join(&alice(), 2));
        assert_eq!(presence.online_count(), 1);

        assert!(!presence.leave("u1"));
        assert_eq!(presence.roster().len(), 1);

        assert!(presence.leave("u1"));
        assert!(presence.roster().is_empty());
        assert!(!presence.leave("u1"));
    }

    #[test]
    fn test_status_for_offline_identity_is_discarded() {
        let mut presence = PresenceAggregator::new();
        assert!(!presence.apply_status(StatusUpdate::new("u1", "away"), 5));
        assert!(presence.roster().is_empty());

        presence.join(&alice(), 1);
        assert!(presence.apply_status(
            StatusUpdate::new("u1", "playing").with_app(Some("a1".into()), Some("Chess".into())),
            9,
        ));
        let entry = &presence.roster()[0];
        assert_eq!(entry.status, "playing");
        assert_eq!(entry.updated_at, 9);
        assert_eq!(entry.app.as_ref().unwrap().id, "a1");

        presence.leave("u1");
        assert!(!presence.apply_status(StatusUpdate::new("u1", "back"), 10));
        assert!(!presence.is_online("u1"));
    }

    #[test]
    fn test_rejoin_resets_status() {
        let mut presence = PresenceAggregator::new();
        presence.join(&alice(), 1);
        presence.apply_status(StatusUpdate::new("u1", "away"), 2);
        presence.leave("u1");
        presence.join(&alice(), 3);

        assert_eq!(presence.roster()[0].status, DEFAULT_STATUS);
    }

    #[test]
    fn test_roster_sorted_by_username() {
        let mut presence = PresenceAggregator::new();
        presence.join(&Identity::new("u2", "zed"), 1);
        presence.join(&Identity::new("u1", "amy"), 1);
        presence.join(&Identity::new("u3", "amy"), 1);

        let ids: Vec<_> = presence.roster().into_iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec!["u1", "u3", "u2"]);
        assert_eq!(presence.usernames(), vec!["amy", "amy", "zed"]);
    }

    #[test]
    fn test_roster_matches_distinct_online_identities() {
        // Deterministic pseudo-random interleaving of joins and leaves.
        let mut presence = PresenceAggregator::new();
        let mut live: Vec<String> = Vec::new();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;

        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let user = format!("u{}", seed % 5);

            if seed % 3 == 0 {
                if let Some(pos) = live.iter().position(|u| *u == user) {
                    live.swap_remove(pos);
                    presence.leave(&user);
                }
            } else {
                live.push(user.clone());
                presence.join(&Identity::new(user.clone(), user), 0);
            }

            let expected: HashSet<&str> = live.iter().map(String::as_str).collect();
            let actual: HashSet<String> =
                presence.roster().into_iter().map(|e| e.user_id).collect();
            assert_eq!(actual.len(), presence.online_count());
            assert_eq!(
                actual.iter().map(String::as_str).collect::<HashSet<_>>(),
                expected
            );
        }
    }
}
