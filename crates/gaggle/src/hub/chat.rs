//! Chat hub: shared transcript plus the list of online usernames.

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use super::engine::{HubConfig, HubCore, RosterEvent};
use super::error::{HubError, HubResult};
use super::presence::PresenceAggregator;
use super::registry::Subscription;
use super::types::{ChatEvent, ConnectionId, HubStats, Identity};
use crate::chat::{ChatMessage, ChatRepository};

impl RosterEvent for ChatEvent {
    fn roster(presence: &PresenceAggregator) -> Self {
        ChatEvent::Presence {
            users: presence.usernames(),
        }
    }
}

enum ChatRequest {
    Register {
        identity: Identity,
        reply: oneshot::Sender<Subscription<ChatEvent>>,
    },
    Unregister {
        id: ConnectionId,
    },
    Post {
        author: Identity,
        content: String,
        reply: oneshot::Sender<HubResult<ChatMessage>>,
    },
    Delete {
        id: String,
        reply: oneshot::Sender<HubResult<()>>,
    },
    Clear {
        reply: oneshot::Sender<HubResult<usize>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Handle to the chat hub loop. Cheap to clone.
#[derive(Clone)]
pub struct ChatHub {
    requests: mpsc::Sender<ChatRequest>,
}

impl ChatHub {
    /// Start the hub loop on the current runtime.
    ///
    /// The loop stops, closing every connection, once all handles are dropped.
    pub fn spawn(repo: ChatRepository, config: &HubConfig) -> Self {
        let (requests, inbox) = mpsc::channel(config.request_buffer());
        let hub = ChatLoop {
            core: HubCore::new(config),
            repo,
            history: Vec::new(),
            history_limit: config.history_limit,
        };
        tokio::spawn(hub.run(inbox));
        Self { requests }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ChatRequest,
    ) -> HubResult<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Add a connection. The snapshot is already queued when this returns.
    pub async fn register(&self, identity: Identity) -> HubResult<Subscription<ChatEvent>> {
        self.request(|reply| ChatRequest::Register { identity, reply })
            .await
    }

    /// Remove a connection. Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        if self
            .requests
            .send(ChatRequest::Unregister { id })
            .await
            .is_err()
        {
            debug!("Chat hub stopped before {} unregistered", id);
        }
    }

    /// Persist and broadcast a message.
    pub async fn post(&self, author: Identity, content: String) -> HubResult<ChatMessage> {
        if content.trim().is_empty() {
            return Err(HubError::Validation("message is empty".to_string()));
        }
        self.request(|reply| ChatRequest::Post {
            author,
            content,
            reply,
        })
        .await?
    }

    /// Delete a message by id and broadcast the new history.
    pub async fn delete(&self, id: impl Into<String>) -> HubResult<()> {
        let id = id.into();
        self.request(|reply| ChatRequest::Delete { id, reply })
            .await?
    }

    /// Delete the whole transcript, returning how many messages went.
    pub async fn clear(&self) -> HubResult<usize> {
        self.request(|reply| ChatRequest::Clear { reply }).await?
    }

    pub async fn stats(&self) -> HubResult<HubStats> {
        self.request(|reply| ChatRequest::Stats { reply }).await
    }
}

struct ChatLoop {
    core: HubCore<ChatEvent>,
    repo: ChatRepository,
    /// The most recent `history_limit` messages, ascending.
    history: Vec<ChatMessage>,
    history_limit: usize,
}

impl ChatLoop {
    async fn run(mut self, mut inbox: mpsc::Receiver<ChatRequest>) {
        self.reload().await;
        info!("Chat hub started with {} message(s)", self.history.len());

        while let Some(request) = inbox.recv().await {
            self.handle(request).await;
            self.core.settle();
        }

        self.core.shutdown();
        info!("Chat hub stopped");
    }

    async fn handle(&mut self, request: ChatRequest) {
        match request {
            ChatRequest::Register { identity, reply } => {
                let subscription = self.core.admit(identity);
                let snapshot = ChatEvent::Snapshot {
                    messages: self.history.clone(),
                    users: self.core.presence().usernames(),
                };
                self.core.send_to(subscription.id, snapshot);
                self.core.broadcast_roster();
                let _ = reply.send(subscription);
            }
            ChatRequest::Unregister { id } => {
                if self.core.release(id) {
                    self.core.broadcast_roster();
                }
            }
            ChatRequest::Post {
                author,
                content,
                reply,
            } => {
                let _ = reply.send(self.post(author, content).await);
            }
            ChatRequest::Delete { id, reply } => {
                let _ = reply.send(self.delete(id).await);
            }
            ChatRequest::Clear { reply } => {
                let _ = reply.send(self.clear().await);
            }
            ChatRequest::Stats { reply } => {
                let _ = reply.send(self.core.stats());
            }
        }
    }

    async fn post(&mut self, author: Identity, content: String) -> HubResult<ChatMessage> {
        let message = ChatMessage::new(&author, content);
        self.repo.add(&message).await?;

        self.history.push(message.clone());
        self.history.sort_by(ChatMessage::chronological);
        self.trim_history();

        self.core.broadcast(ChatEvent::Message {
            message: message.clone(),
            messages: self.history.clone(),
        });
        Ok(message)
    }

    async fn delete(&mut self, id: String) -> HubResult<()> {
        self.repo.delete(&id).await?;

        // Deleting may pull an older message back into the window.
        if let Err(err) = self.refresh().await {
            warn!("Reloading chat history after delete failed: {}", err);
            self.history.retain(|message| message.id != id);
        }

        self.core.broadcast(ChatEvent::Delete {
            deleted_id: id,
            messages: self.history.clone(),
        });
        Ok(())
    }

    async fn clear(&mut self) -> HubResult<usize> {
        let deleted = self.repo.clear().await?;
        self.history.clear();
        self.core.broadcast(ChatEvent::Clear {
            deleted,
            messages: Vec::new(),
        });
        Ok(deleted)
    }

    async fn refresh(&mut self) -> HubResult<()> {
        self.history = self.repo.list(Some(self.history_limit)).await?;
        Ok(())
    }

    async fn reload(&mut self) {
        if let Err(err) = self.refresh().await {
            warn!("Loading chat history failed, starting empty: {}", err);
        }
    }

    fn trim_history(&mut self) {
        if self.history_limit > 0 && self.history.len() > self.history_limit {
            let excess = self.history.len() - self.history_limit;
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::db::Database;
    use crate::store::KvStore;

    async fn hub(queue_capacity: usize) -> (ChatHub, ChatRepository) {
        let db = Database::in_memory().await.unwrap();
        let repo = ChatRepository::new(KvStore::new(db.pool().clone()));
        let config = HubConfig {
            queue_capacity,
            history_limit: 3,
            ..HubConfig::default()
        };
        (ChatHub::spawn(repo.clone(), &config), repo)
    }

    fn drain(sub: &mut Subscription<ChatEvent>) -> Vec<Arc<ChatEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = sub.events.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_register_sends_snapshot_then_presence() {
        let (hub, _) = hub(16).await;
        let alice = Identity::new("u1", "alice");
        hub.post(alice.clone(), "before".into()).await.unwrap();

        let mut sub = hub.register(alice).await.unwrap();
        let events = drain(&mut sub);

        match events[0].as_ref() {
            ChatEvent::Snapshot { messages, users } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(users, &vec!["alice".to_string()]);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert_eq!(
            *events[1],
            ChatEvent::Presence {
                users: vec!["alice".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_post_broadcasts_full_window() {
        let (hub, repo) = hub(16).await;
        let alice = Identity::new("u1", "alice");
        let mut sub = hub.register(alice.clone()).await.unwrap();
        drain(&mut sub);

        for i in 0..5 {
            hub.post(alice.clone(), format!("msg {i}")).await.unwrap();
        }

        let events = drain(&mut sub);
        assert_eq!(events.len(), 5);
        match events[4].as_ref() {
            ChatEvent::Message { message, messages } => {
                assert_eq!(message.message, "msg 4");
                assert_eq!(messages.len(), 3);
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(repo.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_empty_post_is_rejected() {
        let (hub, repo) = hub(16).await;
        let err = hub
            .post(Identity::new("u1", "alice"), "   ".into())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_clear_broadcast() {
        let (hub, _) = hub(16).await;
        let alice = Identity::new("u1", "alice");
        let mut sub = hub.register(alice.clone()).await.unwrap();
        let first = hub.post(alice.clone(), "one".into()).await.unwrap();
        hub.post(alice.clone(), "two".into()).await.unwrap();
        drain(&mut sub);

        assert!(matches!(
            hub.delete("missing").await.unwrap_err(),
            HubError::NotFound(_)
        ));

        hub.delete(first.id.clone()).await.unwrap();
        match drain(&mut sub).last().map(Arc::as_ref) {
            Some(ChatEvent::Delete {
                deleted_id,
                messages,
            }) => {
                assert_eq!(deleted_id, &first.id);
                assert_eq!(messages.len(), 1);
            }
            other => panic!("expected delete, got {other:?}"),
        }

        assert_eq!(hub.clear().await.unwrap(), 1);
        assert_eq!(
            drain(&mut sub).last().map(|e| (**e).clone()),
            Some(ChatEvent::Clear {
                deleted: 1,
                messages: vec![]
            })
        );
    }

    #[tokio::test]
    async fn test_unregister_updates_presence() {
        let (hub, _) = hub(16).await;
        let alice = hub.register(Identity::new("u1", "alice")).await.unwrap();
        let mut bob = hub.register(Identity::new("u2", "bob")).await.unwrap();
        drain(&mut bob);

        hub.unregister(alice.id).await;
        hub.unregister(alice.id).await;

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats, HubStats { connections: 1, online: 1 });
        assert!(alice.closed.is_cancelled());
        assert_eq!(
            drain(&mut bob),
            vec![Arc::new(ChatEvent::Presence {
                users: vec!["bob".into()]
            })]
        );
    }

    #[tokio::test]
    async fn test_undrained_connection_is_evicted_without_stalling() {
        let (hub, _) = hub(4).await;
        let mut slow = hub.register(Identity::new("u1", "slow")).await.unwrap();
        let mut fast = hub.register(Identity::new("u2", "fast")).await.unwrap();
        let author = Identity::new("u2", "fast");

        for i in 0..20 {
            timeout(Duration::from_secs(2), hub.post(author.clone(), format!("m{i}")))
                .await
                .expect("post stalled behind a slow consumer")
                .unwrap();
            drain(&mut fast);
        }

        assert!(slow.closed.is_cancelled());
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats, HubStats { connections: 1, online: 1 });

        // The slow queue held exactly its capacity before it was closed.
        let mut queued = 0;
        while slow.events.recv().await.is_some() {
            queued += 1;
        }
        assert_eq!(queued, 4);
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_hub_serviceable() {
        let db = Database::in_memory().await.unwrap();
        let repo = ChatRepository::new(KvStore::new(db.pool().clone()));
        let hub = ChatHub::spawn(repo, &HubConfig::default());
        let alice = Identity::new("u1", "alice");

        let mut sub = hub.register(alice.clone()).await.unwrap();
        hub.post(alice.clone(), "kept".into()).await.unwrap();
        drain(&mut sub);

        db.close().await;

        let err = hub.post(alice.clone(), "lost".into()).await.unwrap_err();
        assert!(matches!(err, HubError::Storage(_)), "got {err:?}");
        assert!(matches!(
            hub.clear().await.unwrap_err(),
            HubError::Storage(_)
        ));
        assert!(drain(&mut sub).is_empty());

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 1);

        let mut late = hub.register(Identity::new("u2", "bob")).await.unwrap();
        match drain(&mut late)[0].as_ref() {
            ChatEvent::Snapshot { messages, users } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].message, "kept");
                assert_eq!(users, &vec!["alice".to_string(), "bob".to_string()]);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }
}
