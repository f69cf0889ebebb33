//! Chat transcript model and persistence.

mod models;
mod repository;

pub use models::{CHAT_PREFIX, ChatMessage};
pub use repository::ChatRepository;
