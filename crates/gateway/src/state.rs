use std::sync::Arc;

use gb_agents::Orchestrator;
use gb_domain::config::Config;
use gb_llm::LlmClient;
use gb_retriever::Retriever;
use gb_sessions::SessionStore;

use crate::api::auth::CookieAuth;
use crate::runtime::session_lock::SessionLockMap;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: LlmClient,
    pub store: SessionStore,
    pub retriever: Retriever,
    pub orchestrator: Orchestrator,
    /// Per-session turn serialization: a second concurrent turn waits.
    pub session_locks: Arc<SessionLockMap>,
    pub auth: Arc<CookieAuth>,
}
