//! State shared by every hub loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

use super::presence::PresenceAggregator;
use super::registry::{ConnectionRegistry, Subscription, open_connection};
use super::types::{ConnectionId, HubStats, Identity};

/// Smallest usable queue: a chat newcomer is sent two events at once.
const MIN_QUEUE_CAPACITY: usize = 2;

/// Hub tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound events buffered per connection before it is evicted.
    pub queue_capacity: usize,
    /// Requests buffered in front of each hub loop.
    pub request_buffer: usize,
    /// Messages kept in the chat history window.
    pub history_limit: usize,
    /// Seconds between keepalive pings on each socket.
    pub ping_interval_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            request_buffer: 64,
            history_limit: 100,
            ping_interval_secs: 30,
        }
    }
}

impl HubConfig {
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(MIN_QUEUE_CAPACITY)
    }

    pub fn request_buffer(&self) -> usize {
        self.request_buffer.max(1)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

/// Builds the event that tells every connection who is online.
pub(crate) trait RosterEvent: Sized {
    fn roster(presence: &PresenceAggregator) -> Self;
}

/// Registry, roster and eviction backlog of one hub.
///
/// Owned by exactly one loop task. Anything that can evict connections
/// pushes the evicted identities onto a backlog instead of updating the
/// roster in place; [`HubCore::settle`] drains it afterwards.
pub(crate) struct HubCore<E> {
    registry: ConnectionRegistry<E>,
    presence: PresenceAggregator,
    evicted: VecDeque<Identity>,
    next_id: u64,
    queue_capacity: usize,
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

impl<E: RosterEvent> HubCore<E> {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            registry: ConnectionRegistry::default(),
            presence: PresenceAggregator::new(),
            evicted: VecDeque::new(),
            next_id: 0,
            queue_capacity: config.queue_capacity(),
        }
    }

    pub fn presence(&self) -> &PresenceAggregator {
        &self.presence
    }

    pub fn presence_mut(&mut self) -> &mut PresenceAggregator {
        &mut self.presence
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            online: self.presence.online_count(),
        }
    }

    /// Register a new connection and count it towards presence.
    pub fn admit(&mut self, identity: Identity) -> Subscription<E> {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        let (connection, subscription) = open_connection(id, identity.clone(), self.queue_capacity);
        self.registry.insert(connection);
        self.presence.join(&identity, unix_now());
        debug!("Admitted {} for {}", id, identity.user_id);
        subscription
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn release(&mut self, id: ConnectionId) -> bool {
        match self.registry.remove(id) {
            Some(identity) => {
                self.presence.leave(&identity.user_id);
                debug!("Released {} for {}", id, identity.user_id);
                true
            }
            None => false,
        }
    }

    pub fn send_to(&mut self, id: ConnectionId, event: E) {
        if let Some(identity) = self.registry.send_to(id, Arc::new(event)) {
            self.evicted.push_back(identity);
        }
    }

    pub fn broadcast(&mut self, event: E) {
        let evicted = self.registry.fan_out(Arc::new(event));
        self.evicted.extend(evicted);
    }

    pub fn broadcast_roster(&mut self) {
        let event = E::roster(&self.presence);
        self.broadcast(event);
    }

    /// Apply presence changes for evicted connections.
    ///
    /// Each round rebroadcasts the roster once, which may evict more
    /// connections; rounds repeat until the backlog stays empty.
    pub fn settle(&mut self) {
        loop {
            if self.evicted.is_empty() {
                return;
            }
            while let Some(identity) = self.evicted.pop_front() {
                self.presence.leave(&identity.user_id);
            }
            if self.registry.is_empty() {
                continue;
            }
            self.broadcast_roster();
        }
    }

    /// Close every connection; used when the loop stops.
    pub fn shutdown(&mut self) {
        self.registry.close_all();
        self.evicted.clear();
    }
}
