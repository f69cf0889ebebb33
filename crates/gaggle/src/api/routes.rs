//! Router assembly.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};

use crate::auth::auth_middleware;
use crate::ws;

use super::handlers;
use super::state::{AppState, CALLBACK_PATH};

/// Build the full application router.
///
/// Chat routes are only mounted when chat is enabled, so they answer 404
/// otherwise. Everything except health, feature flags and the login
/// round trip sits behind the session middleware, WebSocket upgrades
/// included.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .merge(public_routes(state.clone()))
        .merge(protected_routes(state.clone()))
        .layer(cors_layer(state.auth.allowed_origins()))
        .layer(trace_layer)
}

fn public_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/features", get(handlers::features))
        .route("/auth/login", get(handlers::login))
        .route(CALLBACK_PATH, get(handlers::callback))
        .with_state(state)
}

fn protected_routes(state: AppState) -> Router {
    let mut routes = Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route("/users/me", get(handlers::me))
        .route("/users/{id}", get(handlers::get_user))
        .route("/social/ws", get(ws::social_ws))
        .route("/social/roster", get(handlers::roster))
        .route("/social/status", post(handlers::update_status))
        .route("/admin/stats", get(handlers::admin_stats))
        .route("/admin/sessions", delete(handlers::admin_clear_sessions));

    if state.chat_enabled() {
        routes = routes
            .route("/chat/ws", get(ws::chat_ws))
            .route(
                "/chat/messages",
                get(handlers::list_messages).post(handlers::post_message),
            )
            .route("/admin/chat/messages", delete(handlers::admin_clear_chat))
            .route(
                "/admin/chat/messages/{id}",
                delete(handlers::admin_delete_message),
            );
    }

    routes
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state)
}

/// CORS for the configured browser origins. With no usable origin every
/// cross-origin request is refused.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        warn!("no CORS origins configured, cross-origin requests are refused");
        return CorsLayer::new();
    }

    info!(count = origins.len(), "CORS origins configured");
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}
