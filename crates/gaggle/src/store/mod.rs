//! Durable key-value storage shared by the repositories.

mod error;
mod kv;

pub use error::{StoreError, StoreResult};
pub use kv::{KvStore, KvTxn, Record};
