//! Presence hub: who is online and what they are doing.

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};

use super::engine::{HubConfig, HubCore, RosterEvent, unix_now};
use super::error::{HubError, HubResult};
use super::presence::PresenceAggregator;
use super::registry::Subscription;
use super::types::{ConnectionId, HubStats, Identity, PresenceEntry, PresenceEvent, StatusUpdate};

impl RosterEvent for PresenceEvent {
    fn roster(presence: &PresenceAggregator) -> Self {
        PresenceEvent::Snapshot {
            users: presence.roster(),
        }
    }
}

enum PresenceRequest {
    Register {
        identity: Identity,
        reply: oneshot::Sender<Subscription<PresenceEvent>>,
    },
    Unregister {
        id: ConnectionId,
    },
    Status {
        update: StatusUpdate,
        reply: oneshot::Sender<bool>,
    },
    Roster {
        reply: oneshot::Sender<Vec<PresenceEntry>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Handle to the presence hub loop. Cheap to clone.
#[derive(Clone)]
pub struct PresenceHub {
    requests: mpsc::Sender<PresenceRequest>,
}

impl PresenceHub {
    /// Start the hub loop on the current runtime.
    pub fn spawn(config: &HubConfig) -> Self {
        let (requests, inbox) = mpsc::channel(config.request_buffer());
        tokio::spawn(run(HubCore::new(config), inbox));
        Self { requests }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PresenceRequest,
    ) -> HubResult<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Add a connection. Every connection, the new one included, has the
    /// updated roster queued when this returns.
    pub async fn register(&self, identity: Identity) -> HubResult<Subscription<PresenceEvent>> {
        self.request(|reply| PresenceRequest::Register { identity, reply })
            .await
    }

    /// Remove a connection. Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        if self
            .requests
            .send(PresenceRequest::Unregister { id })
            .await
            .is_err()
        {
            debug!("Presence hub stopped before {} unregistered", id);
        }
    }

    /// Apply a status change.
    ///
    /// Returns whether it was applied; updates for identities with no live
    /// connection are dropped.
    pub async fn update_status(&self, update: StatusUpdate) -> HubResult<bool> {
        if update.status.trim().is_empty() {
            return Err(HubError::Validation("status is empty".to_string()));
        }
        self.request(|reply| PresenceRequest::Status { update, reply })
            .await
    }

    pub async fn roster(&self) -> HubResult<Vec<PresenceEntry>> {
        self.request(|reply| PresenceRequest::Roster { reply }).await
    }

    pub async fn stats(&self) -> HubResult<HubStats> {
        self.request(|reply| PresenceRequest::Stats { reply }).await
    }
}

async fn run(mut core: HubCore<PresenceEvent>, mut inbox: mpsc::Receiver<PresenceRequest>) {
    info!("Presence hub started");

    while let Some(request) = inbox.recv().await {
        match request {
            PresenceRequest::Register { identity, reply } => {
                let subscription = core.admit(identity);
                core.broadcast_roster();
                let _ = reply.send(subscription);
            }
            PresenceRequest::Unregister { id } => {
                if core.release(id) {
                    core.broadcast_roster();
                }
            }
            PresenceRequest::Status { update, reply } => {
                let applied = core.presence_mut().apply_status(update, unix_now());
                if applied {
                    core.broadcast_roster();
                }
                let _ = reply.send(applied);
            }
            PresenceRequest::Roster { reply } => {
                let _ = reply.send(core.presence().roster());
            }
            PresenceRequest::Stats { reply } => {
                let _ = reply.send(core.stats());
            }
        }
        core.settle();
    }

    core.shutdown();
    info!("Presence hub stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn hub() -> PresenceHub {
        PresenceHub::spawn(&HubConfig::default())
    }

    fn last_roster(sub: &mut Subscription<PresenceEvent>) -> Option<Vec<PresenceEntry>> {
        let mut last = None;
        while let Ok(event) = sub.events.try_recv() {
            let PresenceEvent::Snapshot { users } = Arc::unwrap_or_clone(event);
            last = Some(users);
        }
        last
    }

    #[tokio::test]
    async fn test_newcomer_receives_roster() {
        let hub = hub();
        let mut alice = hub.register(Identity::new("u1", "alice")).await.unwrap();

        let roster = last_roster(&mut alice).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].status, "online");
        assert!(roster[0].app.is_none());
    }

    #[tokio::test]
    async fn test_two_connections_one_identity() {
        let hub = hub();
        let first = hub.register(Identity::new("u1", "alice")).await.unwrap();
        let second = hub.register(Identity::new("u1", "alice")).await.unwrap();
        assert_eq!(hub.roster().await.unwrap().len(), 1);

        hub.unregister(first.id).await;
        assert_eq!(hub.roster().await.unwrap().len(), 1);

        hub.unregister(second.id).await;
        assert!(hub.roster().await.unwrap().is_empty());
        assert_eq!(hub.stats().await.unwrap(), HubStats::default());
    }

    #[tokio::test]
    async fn test_status_applies_only_while_online() {
        let hub = hub();
        assert!(!hub.update_status(StatusUpdate::new("u1", "away")).await.unwrap());
        assert!(hub.roster().await.unwrap().is_empty());

        let mut watcher = hub.register(Identity::new("u2", "bob")).await.unwrap();
        let alice = hub.register(Identity::new("u1", "alice")).await.unwrap();
        last_roster(&mut watcher);

        let update = StatusUpdate::new("u1", "playing")
            .with_app(Some("app-1".into()), Some("Chess".into()));
        assert!(hub.update_status(update).await.unwrap());

        let roster = last_roster(&mut watcher).unwrap();
        let entry = roster.iter().find(|e| e.user_id == "u1").unwrap();
        assert_eq!(entry.status, "playing");
        assert_eq!(entry.app.as_ref().unwrap().name.as_deref(), Some("Chess"));

        hub.unregister(alice.id).await;
        assert!(!hub.update_status(StatusUpdate::new("u1", "back")).await.unwrap());
        let roster = hub.roster().await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].user_id, "u2");
    }

    #[tokio::test]
    async fn test_empty_status_is_rejected() {
        let hub = hub();
        let err = hub
            .update_status(StatusUpdate::new("u1", " "))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_registrations_converge() {
        // Nothing drains the kept subscriptions, so give them room.
        let hub = PresenceHub::spawn(&HubConfig {
            queue_capacity: 256,
            ..HubConfig::default()
        });
        let mut tasks = Vec::new();
        for i in 0..20 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let user = format!("u{}", i % 7);
                let sub = hub.register(Identity::new(user.clone(), user)).await.unwrap();
                if i % 2 == 0 {
                    hub.unregister(sub.id).await;
                    None
                } else {
                    Some(sub)
                }
            }));
        }

        let mut kept = Vec::new();
        for task in tasks {
            if let Some(sub) = task.await.unwrap() {
                kept.push(sub);
            }
        }

        let mut expected: Vec<String> = (0..20)
            .filter(|i| i % 2 == 1)
            .map(|i| format!("u{}", i % 7))
            .collect();
        expected.sort();
        expected.dedup();

        let mut online: Vec<String> = hub
            .roster()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.user_id)
            .collect();
        online.sort();
        assert_eq!(online, expected);
        assert_eq!(hub.stats().await.unwrap().connections, kept.len());
    }
}
