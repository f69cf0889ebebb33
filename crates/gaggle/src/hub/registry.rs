//! Live connection bookkeeping for a single hub.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::types::{ConnectionId, Identity};

/// A registered connection as seen by the hub loop.
#[derive(Debug)]
pub struct Connection<E> {
    pub id: ConnectionId,
    pub identity: Identity,
    outbound: mpsc::Sender<Arc<E>>,
    transport: CancellationToken,
}

impl<E> Connection<E> {
    /// Close the outbound queue, then the transport.
    ///
    /// Dropping the only sender ends the event stream. Cancelling the token
    /// wakes a writer that is blocked on a peer no longer reading.
    fn close(self) {
        let Self { outbound, transport, .. } = self;
        drop(outbound);
        transport.cancel();
    }
}

/// The socket side of a connection: where the writer reads events from.
#[derive(Debug)]
pub struct Subscription<E> {
    pub id: ConnectionId,
    pub events: mpsc::Receiver<Arc<E>>,
    /// Cancelled when the hub evicts or unregisters the connection, and by
    /// the writer when the transport fails.
    pub closed: CancellationToken,
}

/// Build both halves of a new connection.
pub(crate) fn open_connection<E>(
    id: ConnectionId,
    identity: Identity,
    capacity: usize,
) -> (Connection<E>, Subscription<E>) {
    let (outbound, events) = mpsc::channel(capacity);
    let transport = CancellationToken::new();
    let connection = Connection {
        id,
        identity,
        outbound,
        transport: transport.clone(),
    };
    let subscription = Subscription {
        id,
        events,
        closed: transport,
    };
    (connection, subscription)
}

/// Connections registered with one hub, keyed by id.
///
/// Only the hub loop touches this, so it needs no locking.
#[derive(Debug)]
pub struct ConnectionRegistry<E> {
    connections: HashMap<ConnectionId, Connection<E>>,
}

impl<E> Default for ConnectionRegistry<E> {
    fn default() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }
}

impl<E> ConnectionRegistry<E> {
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Add a connection. Returns false (and closes the newcomer) if the id is
    /// already registered.
    pub fn insert(&mut self, connection: Connection<E>) -> bool {
        if self.connections.contains_key(&connection.id) {
            warn!("Connection {} registered twice", connection.id);
            connection.close();
            return false;
        }
        self.connections.insert(connection.id, connection);
        true
    }

    /// Remove and close a connection, returning its identity.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Identity> {
        let connection = self.connections.remove(&id)?;
        let identity = connection.identity.clone();
        connection.close();
        Some(identity)
    }

    /// Queue an event for one connection.
    ///
    /// Returns the identity of the connection if it had to be evicted.
    pub fn send_to(&mut self, id: ConnectionId, event: Arc<E>) -> Option<Identity> {
        let connection = self.connections.get(&id)?;
        match connection.outbound.try_send(event) {
            Ok(()) => None,
            Err(err) => {
                debug!("Evicting connection {}: {}", id, describe(&err));
                self.remove(id)
            }
        }
    }

    /// Queue an event for every connection without waiting on any of them.
    ///
    /// Connections whose queue is full or closed are evicted; their
    /// identities are returned so the caller can settle presence.
    pub fn fan_out(&mut self, event: Arc<E>) -> Vec<Identity> {
        let stalled: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|conn| conn.outbound.try_send(Arc::clone(&event)).is_err())
            .map(|conn| conn.id)
            .collect();

        if !stalled.is_empty() {
            warn!("Evicting {} stalled connection(s)", stalled.len());
        }

        stalled
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    /// Close every connection.
    pub fn close_all(&mut self) {
        for (_, connection) in self.connections.drain() {
            connection.close();
        }
    }
}

fn describe<T>(err: &TrySendError<T>) -> &'static str {
    match err {
        TrySendError::Full(_) => "queue full",
        TrySendError::Closed(_) => "queue closed",
    }
}
