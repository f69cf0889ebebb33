//! Known users.

mod repository;

pub use repository::{USER_PREFIX, User, UserRepository};
