//! Login sessions.

mod repository;

pub use repository::{SESSION_PREFIX, SessionStore};
