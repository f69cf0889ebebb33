//! Identity provider seam.

use async_trait::async_trait;
use log::debug;

use super::{AuthError, DevUser};

/// Identity as reported by the provider after a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub id: String,
    pub username: String,
}

/// A third-party login handshake.
///
/// The server sends the browser to [`authorize_url`](Self::authorize_url),
/// the provider sends it back to `/auth/callback` with a code and the
/// untouched `state`, and [`exchange`](Self::exchange) turns the code into
/// an identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start a login.
    fn authorize_url(&self, state: &str, login_hint: Option<&str>) -> String;

    /// Redeem the code the provider returned.
    async fn exchange(&self, code: &str) -> Result<ExternalIdentity, AuthError>;
}

/// Provider that logs in configured development users without leaving the
/// server: the authorize URL points straight back at the callback with the
/// chosen user's id as the code.
#[derive(Debug, Clone)]
pub struct DevIdentityProvider {
    users: Vec<DevUser>,
    callback_url: String,
}

impl DevIdentityProvider {
    pub fn new(users: Vec<DevUser>, callback_url: impl Into<String>) -> Self {
        Self {
            users,
            callback_url: callback_url.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for DevIdentityProvider {
    fn authorize_url(&self, state: &str, login_hint: Option<&str>) -> String {
        let code = login_hint
            .and_then(|hint| {
                self.users
                    .iter()
                    .find(|user| user.id == hint || user.username == hint)
            })
            .or_else(|| self.users.first())
            .map(|user| user.id.as_str())
            .unwrap_or_default();
        format!(
            "{}?code={}&state={}",
            self.callback_url,
            urlencoding::encode(code),
            urlencoding::encode(state)
        )
    }

    async fn exchange(&self, code: &str) -> Result<ExternalIdentity, AuthError> {
        let user = self
            .users
            .iter()
            .find(|user| user.id == code)
            .ok_or(AuthError::InvalidCredentials)?;
        debug!("Dev login for {}", user.id);
        Ok(ExternalIdentity {
            id: user.id.clone(),
            username: user.username.clone(),
        })
    }
}
