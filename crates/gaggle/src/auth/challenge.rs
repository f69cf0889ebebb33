//! Single-use login challenges.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::AuthError;

/// Expiry used when a configured TTL does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

#[derive(Debug)]
struct Challenge {
    expires: Instant,
    /// Where the browser goes once the login succeeds. Checked when the
    /// challenge was issued and never taken from the returning request.
    redirect: String,
}

/// Nonces handed out when a login starts and redeemed when it returns.
///
/// Lives in memory only: a restart invalidates logins in flight. The lock is
/// never held across an await.
#[derive(Debug, Default)]
pub struct ChallengeStore {
    entries: Mutex<HashMap<String, Challenge>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Challenge>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a nonce valid for `ttl` that will redeem to `redirect`.
    pub fn create(&self, ttl: Duration, redirect: impl Into<String>) -> String {
        let nonce = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let expires = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);

        let mut entries = self.entries();
        entries.retain(|_, challenge| challenge.expires > now);
        entries.insert(
            nonce.clone(),
            Challenge {
                expires,
                redirect: redirect.into(),
            },
        );
        nonce
    }

    /// Redeem a nonce, returning the redirect it was issued for. Succeeds at
    /// most once, and only before it expires.
    pub fn consume(&self, nonce: &str) -> Result<String, AuthError> {
        let now = Instant::now();
        let mut entries = self.entries();
        let challenge = entries.remove(nonce);
        entries.retain(|_, challenge| challenge.expires > now);
        match challenge {
            Some(challenge) if challenge.expires > now => Ok(challenge.redirect),
            _ => Err(AuthError::InvalidChallenge),
        }
    }

    /// Outstanding challenges, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
