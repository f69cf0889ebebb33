//! Serving one accepted WebSocket against a hub.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;

use crate::hub::{
    ChatEvent, ChatHub, ClientFrame, ConnectionId, ConnectionWriter, HubError, HubResult,
    Identity, PresenceEvent, PresenceHub, StatusUpdate, Subscription,
};

/// The parts of a hub a socket needs.
#[async_trait]
pub trait SocketHub: Clone + Send + Sync + 'static {
    type Event: Serialize + Send + Sync + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn register(&self, identity: Identity) -> HubResult<Subscription<Self::Event>>;

    async fn unregister(&self, id: ConnectionId);

    /// Handle a text frame from the client. Bad frames are ignored.
    async fn on_text(&self, identity: &Identity, text: &str);
}

#[async_trait]
impl SocketHub for ChatHub {
    type Event = ChatEvent;

    fn name(&self) -> &'static str {
        "chat"
    }

    async fn register(&self, identity: Identity) -> HubResult<Subscription<ChatEvent>> {
        ChatHub::register(self, identity).await
    }

    async fn unregister(&self, id: ConnectionId) {
        ChatHub::unregister(self, id).await
    }

    async fn on_text(&self, identity: &Identity, _text: &str) {
        debug!("Ignoring chat frame from {}", identity.user_id);
    }
}

#[async_trait]
impl SocketHub for PresenceHub {
    type Event = PresenceEvent;

    fn name(&self) -> &'static str {
        "social"
    }

    async fn register(&self, identity: Identity) -> HubResult<Subscription<PresenceEvent>> {
        PresenceHub::register(self, identity).await
    }

    async fn unregister(&self, id: ConnectionId) {
        PresenceHub::unregister(self, id).await
    }

    async fn on_text(&self, identity: &Identity, text: &str) {
        let ClientFrame::Status {
            status,
            app_id,
            app_name,
        } = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Ignoring frame from {}: {}", identity.user_id, e);
                return;
            }
        };

        let update = StatusUpdate::new(identity.user_id.clone(), status).with_app(app_id, app_name);
        match self.update_status(update).await {
            Ok(_) | Err(HubError::Validation(_)) => {}
            Err(e) => warn!("Status update from {} failed: {}", identity.user_id, e),
        }
    }
}

/// Where a socket is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Draining,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Registered => write!(f, "registered"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Forward-only connection state.
///
/// Only the `Registered -> Draining` step may unregister from the hub, so
/// however many teardown paths fire, the hub hears about it once.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `Connecting -> Registered`.
    pub fn registered(&mut self) -> bool {
        self.advance(ConnectionState::Connecting, ConnectionState::Registered)
    }

    /// `Registered -> Draining`. True exactly once; the caller then
    /// unregisters.
    pub fn begin_draining(&mut self) -> bool {
        self.advance(ConnectionState::Registered, ConnectionState::Draining)
    }

    /// Any state `-> Closed`.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn advance(&mut self, from: ConnectionState, to: ConnectionState) -> bool {
        if self.state != from {
            return false;
        }
        self.state = to;
        true
    }
}

/// Run a registered socket until either side closes it.
pub async fn serve_socket<H: SocketHub>(
    socket: WebSocket,
    hub: H,
    identity: Identity,
    ping_interval: Duration,
) {
    let mut lifecycle = ConnectionLifecycle::new();

    let subscription = match hub.register(identity.clone()).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("Registering {} with {} hub failed: {}", identity.user_id, hub.name(), e);
            lifecycle.close();
            return;
        }
    };
    lifecycle.registered();

    let id = subscription.id;
    let closed = subscription.closed.clone();
    info!("{} joined {} hub as {}", identity.user_id, hub.name(), id);

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(ConnectionWriter::new(sink, subscription, ping_interval).run());

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => hub.on_text(&identity, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Read from {} failed: {}", id, e);
                    break;
                }
            },
        }
    }

    if lifecycle.begin_draining() {
        hub.unregister(id).await;
    }
    closed.cancel();

    match writer.await {
        Ok(exit) => debug!("{} writer finished: {:?}", id, exit),
        Err(e) => warn!("{} writer task failed: {}", id, e),
    }
    lifecycle.close();
    info!("{} left {} hub", identity.user_id, hub.name());
}
