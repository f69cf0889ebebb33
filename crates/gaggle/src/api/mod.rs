//! HTTP API module.
//!
//! REST endpoints for login, users, chat, presence, and administration.
//! The WebSocket endpoints live in [`crate::ws`] but are mounted here.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::{AppState, CALLBACK_PATH, StateOptions};
