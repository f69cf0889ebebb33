//! WebSocket upgrade handlers.
//!
//! Authentication runs in the middleware in front of these routes, so a
//! rejected token never reaches an upgrade.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use log::info;

use crate::api::{ApiError, AppState};
use crate::auth::CurrentUser;

use super::socket::serve_socket;

/// GET /chat/ws
pub async fn chat_ws(
    State(state): State<AppState>,
    user: CurrentUser,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let hub = state.chat()?.clone();
    let ping_interval = state.ping_interval();
    info!("Chat WebSocket upgrade request from user {}", user.id);

    Ok(ws.on_upgrade(move |socket| serve_socket(socket, hub, user.identity(), ping_interval)))
}

/// GET /social/ws
pub async fn social_ws(
    State(state): State<AppState>,
    user: CurrentUser,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let hub = state.social.clone();
    let ping_interval = state.ping_interval();
    info!("Social WebSocket upgrade request from user {}", user.id);

    Ok(ws.on_upgrade(move |socket| serve_socket(socket, hub, user.identity(), ping_interval)))
}
