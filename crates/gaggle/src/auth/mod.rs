//! Authentication module.
//!
//! Sessions are opaque tokens minted after a login through an
//! [`IdentityProvider`]. Login starts with a single-use challenge so a
//! callback cannot be replayed.

mod challenge;
mod config;
mod error;
mod middleware;
mod provider;

pub use challenge::ChallengeStore;
pub use config::{AuthConfig, ConfigValidationError, DevUser};
pub use error::AuthError;
pub use middleware::{AuthState, CurrentUser, RequireAdmin, auth_middleware};
pub use provider::{DevIdentityProvider, ExternalIdentity, IdentityProvider};
