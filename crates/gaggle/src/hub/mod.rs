//! Connection fan-out hubs.
//!
//! Each hub is a single task that owns its connection registry and presence
//! roster. Everything else talks to it through a cloneable handle:
//!
//! ```text
//!   socket reader ──┐                         ┌──► queue ──► writer ──► socket
//!   HTTP handler ───┼──► requests ──► hub loop ┼──► queue ──► writer ──► socket
//!   admin action ───┘        (FIFO)            └──► queue ──► writer ──► socket
//! ```
//!
//! Queues are small and bounded and the loop never waits on them. A
//! connection whose queue is full when an event is fanned out is evicted:
//! its queue and transport are closed and its presence is released on the
//! next settling step of the loop. Clients recover by reconnecting, which
//! always starts with a full snapshot.

mod chat;
mod engine;
mod error;
mod presence;
mod registry;
mod social;
mod types;
mod writer;

pub use chat::ChatHub;
pub use engine::HubConfig;
pub use error::{HubError, HubResult};
pub use presence::PresenceAggregator;
pub use registry::{Connection, ConnectionRegistry, Subscription};
pub use social::PresenceHub;
pub use types::{
    ActiveApp, ChatEvent, ClientFrame, ConnectionId, DEFAULT_STATUS, HubStats, Identity,
    PresenceEntry, PresenceEvent, StatusUpdate,
};
pub use writer::{ConnectionWriter, WriterExit};
