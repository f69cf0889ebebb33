//! Session authentication for HTTP and WebSocket routes.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, Uri, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use log::{debug, warn};

use super::{AuthConfig, AuthError};
use crate::hub::Identity;
use crate::session::SessionStore;
use crate::store::StoreError;
use crate::user::UserRepository;

/// Token from an `Authorization: Bearer <token>` value. The scheme is
/// case-insensitive; anything but exactly one token after it is rejected.
fn parse_bearer(value: &str) -> Result<&str, AuthError> {
    let (scheme, rest) = value
        .trim()
        .split_once(char::is_whitespace)
        .ok_or(AuthError::InvalidAuthHeader)?;
    let token = rest.trim();

    if !scheme.eq_ignore_ascii_case("bearer")
        || token.is_empty()
        || token.contains(char::is_whitespace)
    {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// `token` query parameter, for WebSocket clients that cannot set headers.
fn query_token(uri: &Uri) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| match pair.split_once('=') {
        Some(("token", value)) => urlencoding::decode(value).ok().map(|v| v.into_owned()),
        _ => None,
    })
}

/// The token a request presents. The header wins over the query string.
fn presented_token(req: &Request<Body>) -> Result<String, AuthError> {
    match req.headers().get(AUTHORIZATION) {
        Some(value) => {
            let value = value.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
            parse_bearer(value).map(str::to_string)
        }
        None => query_token(req.uri()).ok_or(AuthError::MissingAuthHeader),
    }
}

/// What the middleware needs to turn a token into a user.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    sessions: SessionStore,
    users: UserRepository,
}

impl AuthState {
    pub fn new(config: AuthConfig, sessions: SessionStore, users: UserRepository) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            users,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    /// Resolve a session token to the user it belongs to.
    pub async fn authenticate(&self, token: &str) -> Result<CurrentUser, AuthError> {
        let user_id = self.sessions.resolve(token).await.map_err(|e| match e {
            StoreError::NotFound(_) => AuthError::InvalidToken,
            other => AuthError::Internal(other.to_string()),
        })?;

        let user = self.users.get(&user_id).await.map_err(|e| match e {
            StoreError::NotFound(_) => {
                warn!("Session points at unknown user {}", user_id);
                AuthError::UserNotFound
            }
            other => AuthError::Internal(other.to_string()),
        })?;

        Ok(CurrentUser {
            is_admin: self.config.is_admin(&user.id),
            id: user.id,
            username: user.username,
            token: token.to_string(),
        })
    }
}

/// The user a request was authenticated as.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
    /// Session token the request presented.
    pub token: String,
}

impl CurrentUser {
    pub fn identity(&self) -> Identity {
        Identity::new(self.id.clone(), self.username.clone())
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Resolve the presented session and attach the [`CurrentUser`].
///
/// Runs in front of the WebSocket routes too, so a bad token is refused
/// before the upgrade and never reaches a hub.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let token = presented_token(&req)?;
    let user = auth.authenticate(&token).await?;
    debug!("{} authenticated for {}", user.id, req.uri().path());

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Extractor that only admits configured admins.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub CurrentUser);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(AuthError::InsufficientPermissions(
                "admin role required".to_string(),
            ));
        }
        Ok(RequireAdmin(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::KvStore;
    use crate::user::User;

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc123").unwrap(), "abc123");
        assert_eq!(parse_bearer("bearer   tok").unwrap(), "tok");
        assert_eq!(parse_bearer("  BEARER\ttok ").unwrap(), "tok");

        for bad in ["", "Bearer", "Bearer ", "Basic abc", "Bearer a b", "bear tok"] {
            assert!(parse_bearer(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_header_wins_over_query() {
        let req = Request::builder()
            .uri("/social/ws?token=from-query")
            .header(AUTHORIZATION, "Bearer from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_token(&req).unwrap(), "from-header");

        let req = Request::builder()
            .uri("/social/ws?x=1&token=a%2Bb")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_token(&req).unwrap(), "a+b");

        let req = Request::builder()
            .uri("/social/ws?tokens=abc")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            presented_token(&req),
            Err(AuthError::MissingAuthHeader)
        ));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let db = Database::in_memory().await.unwrap();
        let kv = KvStore::new(db.pool().clone());
        let sessions = SessionStore::new(kv.clone());
        let users = UserRepository::new(kv);
        let config = AuthConfig {
            admins: vec!["u1".into()],
            ..AuthConfig::default()
        };
        let auth = AuthState::new(config, sessions.clone(), users.clone());

        users
            .upsert(&User {
                id: "u1".into(),
                username: "alice".into(),
            })
            .await
            .unwrap();
        let token = sessions.create("u1", None).await.unwrap();

        let user = auth.authenticate(&token).await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.is_admin);

        assert!(matches!(
            auth.authenticate("bogus").await,
            Err(AuthError::InvalidToken)
        ));

        let orphan = sessions.create("ghost", None).await.unwrap();
        assert!(matches!(
            auth.authenticate(&orphan).await,
            Err(AuthError::UserNotFound)
        ));
    }
}
