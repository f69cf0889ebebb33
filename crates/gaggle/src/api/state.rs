//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use super::error::ApiError;
use crate::auth::{AuthConfig, AuthState, ChallengeStore, DevIdentityProvider, IdentityProvider};
use crate::chat::ChatRepository;
use crate::hub::{ChatHub, HubConfig, PresenceHub};
use crate::session::SessionStore;
use crate::store::KvStore;
use crate::user::UserRepository;

/// Path the identity provider returns the browser to.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Everything the state needs beyond a database pool.
#[derive(Debug, Clone, Default)]
pub struct StateOptions {
    pub auth: AuthConfig,
    pub hub: HubConfig,
    pub chat_enabled: bool,
    /// Session lifetime; `None` never expires.
    pub session_ttl: Option<Duration>,
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub sessions: SessionStore,
    pub users: UserRepository,
    pub chat_store: ChatRepository,
    pub challenges: Arc<ChallengeStore>,
    /// Login provider, if any is configured.
    pub provider: Option<Arc<dyn IdentityProvider>>,
    /// `None` when chat is disabled.
    pub chat: Option<ChatHub>,
    pub social: PresenceHub,
    pub hub_config: Arc<HubConfig>,
    pub session_ttl: Option<Duration>,
}

impl AppState {
    /// Build the state and start both hubs on the current runtime.
    ///
    /// In dev mode the development identity provider is installed.
    pub fn new(pool: SqlitePool, options: StateOptions) -> Self {
        let kv = KvStore::new(pool);
        let sessions = SessionStore::new(kv.clone());
        let users = UserRepository::new(kv.clone());
        let chat_store = ChatRepository::new(kv);

        let provider: Option<Arc<dyn IdentityProvider>> = if options.auth.dev_mode {
            Some(Arc::new(DevIdentityProvider::new(
                options.auth.dev_users.clone(),
                CALLBACK_PATH,
            )))
        } else {
            None
        };

        let chat = options
            .chat_enabled
            .then(|| ChatHub::spawn(chat_store.clone(), &options.hub));
        let social = PresenceHub::spawn(&options.hub);

        Self {
            auth: AuthState::new(options.auth, sessions.clone(), users.clone()),
            sessions,
            users,
            chat_store,
            challenges: Arc::new(ChallengeStore::new()),
            provider,
            chat,
            social,
            hub_config: Arc::new(options.hub),
            session_ttl: options.session_ttl,
        }
    }

    /// Replace the identity provider.
    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn chat(&self) -> Result<&ChatHub, ApiError> {
        self.chat
            .as_ref()
            .ok_or_else(|| ApiError::not_found("chat"))
    }

    pub fn chat_enabled(&self) -> bool {
        self.chat.is_some()
    }

    pub fn ping_interval(&self) -> Duration {
        self.hub_config.ping_interval()
    }

    pub fn history_limit(&self) -> usize {
        self.hub_config.history_limit
    }
}
