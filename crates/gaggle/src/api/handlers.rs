//! HTTP request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::auth::{AuthError, CurrentUser, RequireAdmin};
use crate::chat::ChatMessage;
use crate::hub::{HubStats, PresenceEntry, StatusUpdate};
use crate::user::User;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Feature flags exposed to the frontend.
#[derive(Debug, Serialize)]
pub struct FeaturesResponse {
    pub chat_enabled: bool,
}

/// Get feature flags.
pub async fn features(State(state): State<AppState>) -> Json<FeaturesResponse> {
    Json(FeaturesResponse {
        chat_enabled: state.chat_enabled(),
    })
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Where to send the browser once logged in.
    pub redirect: Option<String>,
    /// Passed through to the identity provider.
    pub login_hint: Option<String>,
}

/// Start a login: issue a challenge and hand off to the identity provider.
pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> ApiResult<Redirect> {
    let provider = state
        .provider
        .as_ref()
        .ok_or(AuthError::ProviderUnavailable)?;

    let redirect = query
        .redirect
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "/".to_string());
    if !state.auth.config().allows_redirect(&redirect) {
        return Err(ApiError::bad_request("redirect target is not allowed"));
    }

    // The provider round-trips only the nonce; the approved redirect stays
    // on the server.
    let nonce = state
        .challenges
        .create(state.auth.config().challenge_ttl(), redirect);

    Ok(Redirect::temporary(
        &provider.authorize_url(&nonce, query.login_hint.as_deref()),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// Append `token` to a redirect target.
fn with_token(redirect: &str, token: &str) -> String {
    let separator = if redirect.contains('?') { '&' } else { '?' };
    format!("{redirect}{separator}token={}", urlencoding::encode(token))
}

/// Finish a login: redeem the challenge, exchange the code, open a session.
#[instrument(skip_all)]
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Response> {
    let provider = state
        .provider
        .as_ref()
        .ok_or(AuthError::ProviderUnavailable)?;

    let redirect = state.challenges.consume(&query.state)?;

    let identity = provider.exchange(&query.code).await?;
    let user = User {
        id: identity.id,
        username: identity.username,
    };
    state.users.upsert(&user).await?;

    let token = state.sessions.create(&user.id, state.session_ttl).await?;
    info!(user_id = %user.id, "user logged in");

    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, with_token(&redirect, &token))],
    )
        .into_response())
}

/// Revoke the session the request was made with.
pub async fn logout(State(state): State<AppState>, user: CurrentUser) -> ApiResult<StatusCode> {
    state.sessions.revoke(&user.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
}

/// Get the current user.
pub async fn me(user: CurrentUser) -> Json<UserResponse> {
    Json(UserResponse {
        id: user.id,
        username: user.username,
        is_admin: user.is_admin,
    })
}

/// Look up a user by id.
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserResponse>> {
    let user = state.users.get(&id).await?;
    Ok(Json(UserResponse {
        is_admin: state.auth.config().is_admin(&user.id),
        id: user.id,
        username: user.username,
    }))
}

// ============================================================================
// Chat
// ============================================================================

/// Most recent messages, oldest first.
pub async fn list_messages(State(state): State<AppState>) -> ApiResult<Json<Vec<ChatMessage>>> {
    state.chat()?;
    let messages = state.chat_store.list(Some(state.history_limit())).await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub message: String,
}

/// Post a chat message.
pub async fn post_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let message = state
        .chat()?
        .post(user.identity(), request.message)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

// ============================================================================
// Social
// ============================================================================

/// Current presence roster.
pub async fn roster(State(state): State<AppState>) -> ApiResult<Json<Vec<PresenceEntry>>> {
    Ok(Json(state.social.roster().await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// False when the user has no live presence connection.
    pub applied: bool,
}

/// Report the current user's status.
pub async fn update_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let update =
        StatusUpdate::new(user.id, request.status).with_app(request.app_id, request.app_name);
    let applied = state.social.update_status(update).await?;
    Ok(Json(StatusResponse { applied }))
}

// ============================================================================
// Admin
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AdminStatsResponse {
    pub sessions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<HubStats>,
    pub social: HubStats,
}

/// Session and connection counters.
pub async fn admin_stats(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> ApiResult<Json<AdminStatsResponse>> {
    let chat = match &state.chat {
        Some(hub) => Some(hub.stats().await?),
        None => None,
    };
    Ok(Json(AdminStatsResponse {
        sessions: state.sessions.count().await?,
        chat,
        social: state.social.stats().await?,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: usize,
}

/// Log everyone out.
#[instrument(skip_all, fields(admin = %admin.id))]
pub async fn admin_clear_sessions(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> ApiResult<Json<DeletedResponse>> {
    let deleted = state.sessions.clear().await?;
    info!(deleted, "cleared sessions");
    Ok(Json(DeletedResponse { deleted }))
}

/// Delete the whole chat transcript.
#[instrument(skip_all, fields(admin = %admin.id))]
pub async fn admin_clear_chat(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> ApiResult<Json<DeletedResponse>> {
    let deleted = state.chat()?.clear().await?;
    info!(deleted, "cleared chat");
    Ok(Json(DeletedResponse { deleted }))
}

#[derive(Debug, Serialize)]
pub struct DeletedMessageResponse {
    pub deleted_id: String,
}

/// Delete one chat message.
#[instrument(skip_all, fields(admin = %admin.id, message_id = %id))]
pub async fn admin_delete_message(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletedMessageResponse>> {
    state.chat()?.delete(id.clone()).await?;
    Ok(Json(DeletedMessageResponse { deleted_id: id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_token() {
        assert_eq!(with_token("/lobby", "abc"), "/lobby?token=abc");
        assert_eq!(
            with_token("http://localhost:3000/app?x=1", "abc"),
            "http://localhost:3000/app?x=1&token=abc"
        );
    }
}
