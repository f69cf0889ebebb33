//! Gaggle: live chat and presence hub backend.
//!
//! Clients authenticate through an identity provider, receive an opaque
//! session token, and open WebSockets to two hubs: a shared chat
//! transcript and a presence roster. See [`hub`] for how fan-out works.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod hub;
pub mod session;
pub mod store;
pub mod user;
pub mod ws;
