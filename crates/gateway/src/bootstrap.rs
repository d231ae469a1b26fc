//! AppState construction and background-task spawning.
//!
//! `build_app_state` boots the full runtime from config; `assemble` wires
//! an AppState from already-built services and is shared with the tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::RngCore;

use gb_agents::{Orchestrator, Workflow};
use gb_domain::config::{Config, ConfigSeverity};
use gb_llm::{AnthropicProvider, LlmClient, OpenAiCompatProvider};
use gb_retriever::{Embedder, Retriever, SqliteProfileIndex};
use gb_sessions::{sweeper, SessionStore};

use crate::api::auth::{ConfigCredentialStore, CookieAuth};
use crate::runtime::session_lock::SessionLockMap;
use crate::state::AppState;

/// Bridges the LLM client's embeddings provider into the retriever.
struct ClientEmbedder(LlmClient);

#[async_trait::async_trait]
impl Embedder for ClientEmbedder {
    async fn embed_query(&self, text: &str) -> gb_domain::error::Result<Vec<f32>> {
        let mut vectors = self.0.embed(vec![text.to_owned()]).await?;
        vectors
            .pop()
            .ok_or_else(|| gb_domain::error::Error::Other("empty embeddings response".into()))
    }
}

/// Validate config, initialize every subsystem and return a fully wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── LLM client ───────────────────────────────────────────────
    let chat_provider =
        Arc::new(AnthropicProvider::from_config(&config.llm).context("initializing LLM provider")?);
    let mut llm = LlmClient::new(chat_provider)
        .with_timeout(Duration::from_secs(config.llm.timeout_secs));
    if config.embeddings.api_key.is_some() {
        let embedder = Arc::new(
            OpenAiCompatProvider::from_config(&config.embeddings)
                .context("initializing embeddings provider")?,
        );
        llm = llm.with_embedder(embedder);
        tracing::info!(model = %config.embeddings.model, "embeddings provider ready");
    } else {
        tracing::warn!("no embeddings key configured; semantic retrieval will be unavailable");
    }
    tracing::info!(model = %config.llm.model, "LLM client ready");

    // ── Profile retriever (read-only) ────────────────────────────
    let index = SqliteProfileIndex::open(
        &config.database.profiles_path,
        Arc::new(ClientEmbedder(llm.clone())),
    )
    .await
    .context("opening profile index")?;
    let retriever = Retriever::new(Arc::new(index));

    // ── Session store + sweeper ──────────────────────────────────
    if let Some(parent) = config.database.sessions_path.parent() {
        std::fs::create_dir_all(parent).context("creating data directory")?;
    }
    let store = SessionStore::open(&config.database.sessions_path)
        .await
        .context("opening session store")?;
    // Detached: the sweep task lives for the process lifetime.
    let _ = sweeper::spawn(
        store.clone(),
        Duration::from_secs(config.sessions.sweep_interval_secs),
        Duration::from_secs(config.sessions.deactivate_after_secs),
    );
    tracing::info!(
        sweep_interval_secs = config.sessions.sweep_interval_secs,
        "session sweeper running"
    );

    Ok(assemble(config, llm, retriever, store))
}

/// Wire an [`AppState`] from built services.
pub fn assemble(
    config: Arc<Config>,
    llm: LlmClient,
    retriever: Retriever,
    store: SessionStore,
) -> AppState {
    let workflow = Workflow::new(
        llm.clone(),
        retriever.clone(),
        config.chat.relevance_threshold,
        config.retriever.min_similarity,
    );
    let orchestrator = Orchestrator::new(
        llm.clone(),
        store.clone(),
        workflow,
        config.chat.history_turns,
        config.retriever.max_results,
    );

    let cookie_key = match &config.auth.cookie_secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            // Dev mode: sessions die with the process.
            let mut key = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            key
        }
    };
    let auth = Arc::new(CookieAuth::new(
        cookie_key,
        config.auth.cookie_ttl_secs,
        Arc::new(ConfigCredentialStore::new(&config.auth)),
    ));

    AppState {
        config,
        llm,
        store,
        retriever,
        orchestrator,
        session_locks: Arc::new(SessionLockMap::new()),
        auth,
    }
}
