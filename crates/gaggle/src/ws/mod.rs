//! WebSocket endpoints for the chat and presence hubs.

mod handler;
mod socket;

pub use handler::{chat_ws, social_ws};
pub use socket::{ConnectionLifecycle, ConnectionState, SocketHub, serve_socket};
