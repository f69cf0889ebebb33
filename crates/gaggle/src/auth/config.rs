//! Authentication configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable development login against `dev_users`.
    pub dev_mode: bool,

    /// Users the development identity provider accepts.
    pub dev_users: Vec<DevUser>,

    /// Allowed CORS origins, also the allowed login redirect targets.
    /// If empty outside dev mode, CORS is disabled.
    pub allowed_origins: Vec<String>,

    /// User ids with access to the admin endpoints.
    pub admins: Vec<String>,

    /// How long a started login stays valid, in seconds.
    pub challenge_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            dev_users: Vec::new(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
            admins: Vec::new(),
            challenge_ttl_secs: 600,
        }
    }
}

/// A user the development identity provider will log in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevUser {
    pub id: String,
    pub username: String,
}

impl AuthConfig {
    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs.max(1))
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|admin| admin == user_id)
    }

    /// Whether a post-login redirect may point at `target`.
    ///
    /// Relative paths are always allowed. Absolute URLs must start with one
    /// of `allowed_origins`, unless the list is empty.
    pub fn allows_redirect(&self, target: &str) -> bool {
        if target.starts_with('/') && !target.starts_with("//") {
            return true;
        }
        if self.allowed_origins.is_empty() {
            return true;
        }
        self.allowed_origins.iter().any(|origin| {
            let origin = origin.trim_end_matches('/');
            target == origin
                || target
                    .strip_prefix(origin)
                    .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('?'))
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut seen = HashSet::new();
        for user in &self.dev_users {
            if user.id.trim().is_empty() || user.username.trim().is_empty() {
                return Err(ConfigValidationError::BlankDevUser);
            }
            if !seen.insert(user.id.as_str()) {
                return Err(ConfigValidationError::DuplicateDevUser(user.id.clone()));
            }
        }
        if self.dev_mode && self.dev_users.is_empty() {
            return Err(ConfigValidationError::NoDevUsers);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("dev_mode is enabled but no dev_users are configured")]
    NoDevUsers,
    #[error("dev users need a non-empty id and username")]
    BlankDevUser,
    #[error("dev user id {0} is configured more than once")]
    DuplicateDevUser(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(id: &str) -> DevUser {
        DevUser {
            id: id.to_string(),
            username: format!("{id}-name"),
        }
    }

    #[test]
    fn test_validate_dev_users() {
        let mut config = AuthConfig::default();
        assert!(config.validate().is_ok());

        config.dev_mode = true;
        assert_eq!(config.validate(), Err(ConfigValidationError::NoDevUsers));

        config.dev_users = vec![dev("a"), dev("a")];
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::DuplicateDevUser("a".into()))
        );

        config.dev_users = vec![dev("a"), dev("b")];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_allows_redirect() {
        let config = AuthConfig::default();
        assert!(config.allows_redirect("/lobby"));
        assert!(!config.allows_redirect("//evil.example"));
        assert!(config.allows_redirect("http://localhost:3000/app?x=1"));
        assert!(config.allows_redirect("http://localhost:3000"));
        assert!(!config.allows_redirect("http://localhost:30001/"));
        assert!(!config.allows_redirect("https://evil.example/"));

        let open = AuthConfig {
            allowed_origins: Vec::new(),
            ..AuthConfig::default()
        };
        assert!(open.allows_redirect("https://anywhere.example/"));
    }
}
