use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Chat-completion provider settings. The API key is only ever read from
/// the environment (`LLM_API_KEY`), never from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_url")]
    pub base_url: String,
    #[serde(default = "d_llm_model")]
    pub model: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Per-call timeout in seconds.
    #[serde(default = "d_45")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_url(),
            model: d_llm_model(),
            api_key: None,
            timeout_secs: 45,
        }
    }
}

/// Embeddings provider settings (OpenAI-compatible). Powers the semantic
/// side of profile retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "d_emb_url")]
    pub base_url: String,
    #[serde(default = "d_emb_model")]
    pub model: String,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: d_emb_url(),
            model: d_emb_model(),
            api_key: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Sessions + messages store (read/write).
    #[serde(default = "d_sessions_db")]
    pub sessions_path: PathBuf,
    /// Provider profile index (read-only).
    #[serde(default = "d_profiles_db")]
    pub profiles_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sessions_path: d_sessions_db(),
            profiles_path: d_profiles_db(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retrieval & chat behavior
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    /// Upper bound on search candidates per turn.
    #[serde(default = "d_7")]
    pub max_results: usize,
    /// Semantic similarity floor.
    #[serde(default = "d_0_5")]
    pub min_similarity: f64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            max_results: 7,
            min_similarity: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Sessions idle longer than this are deactivated by the sweeper.
    #[serde(default = "d_week_secs")]
    pub deactivate_after_secs: u64,
    /// How often the sweeper runs.
    #[serde(default = "d_week_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            deactivate_after_secs: d_week_secs(),
            sweep_interval_secs: d_week_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Adjudicator relevance threshold.
    #[serde(default = "d_0_7")]
    pub relevance_threshold: f64,
    /// How many prior turns the orchestrator folds into its prompts.
    #[serde(default = "d_5")]
    pub history_turns: usize,
    /// Allowed country values for session creation.
    #[serde(default = "d_countries")]
    pub countries: Vec<String>,
    /// Allowed service types for session creation.
    #[serde(default = "d_service_types")]
    pub service_types: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.7,
            history_turns: 5,
            countries: d_countries(),
            service_types: d_service_types(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cookie auth settings. Credentials themselves live in an external
/// read-only store; the `users` list here is the dev-mode stand-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC key for session cookies. Unset = dev mode (random per boot).
    #[serde(skip)]
    pub cookie_secret: Option<String>,
    /// Cookie lifetime in seconds.
    #[serde(default = "d_day_secs")]
    pub cookie_ttl_secs: u64,
    #[serde(default)]
    pub users: Vec<UserCredential>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_secret: None,
            cookie_ttl_secs: d_day_secs(),
            users: Vec::new(),
        }
    }
}

/// A dev-mode user record: email + SHA-256 hex of the password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    pub email: String,
    pub password_sha256: String,
    pub owner_id: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let error = |field: &str, message: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message,
        };
        let warn = |field: &str, message: String| ConfigIssue {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message,
        };

        if self.server.port == 0 {
            issues.push(error("server.port", "port must be greater than 0".into()));
        }
        if self.server.host.is_empty() {
            issues.push(error("server.host", "host must not be empty".into()));
        }

        if self.llm.api_key.is_none() {
            issues.push(warn(
                "llm.api_key",
                "LLM_API_KEY is not set; chat endpoints will be unavailable".into(),
            ));
        }
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://")
        {
            issues.push(error(
                "llm.base_url",
                format!("base_url must be an http(s) URL (got \"{}\")", self.llm.base_url),
            ));
        }

        if self.retriever.max_results == 0 {
            issues.push(error(
                "retriever.max_results",
                "max_results must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retriever.min_similarity) {
            issues.push(error(
                "retriever.min_similarity",
                "min_similarity must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.chat.relevance_threshold) {
            issues.push(error(
                "chat.relevance_threshold",
                "relevance_threshold must be within [0, 1]".into(),
            ));
        }

        if self.chat.countries.is_empty() {
            issues.push(error("chat.countries", "country list must not be empty".into()));
        }
        if self.chat.service_types.is_empty() {
            issues.push(error(
                "chat.service_types",
                "service type list must not be empty".into(),
            ));
        }

        if self.auth.cookie_secret.is_none() {
            issues.push(warn(
                "auth.cookie_secret",
                "COOKIE_SECRET is not set; sessions will not survive a restart".into(),
            ));
        }

        issues
    }

    /// Load config from a TOML file (missing file = defaults), then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
            toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply the enumerated environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            if !v.is_empty() {
                self.llm.api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            if !v.is_empty() {
                self.llm.model = v;
            }
        }
        if let Ok(v) = std::env::var("EMBEDDINGS_API_KEY") {
            if !v.is_empty() {
                self.embeddings.api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("EMBEDDINGS_MODEL") {
            if !v.is_empty() {
                self.embeddings.model = v;
            }
        }
        if let Some(v) = env_parse::<u64>("SESSION_DEACTIVATE_AFTER") {
            self.sessions.deactivate_after_secs = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_RESULTS") {
            self.retriever.max_results = v;
        }
        if let Some(v) = env_parse::<f64>("RELEVANCE_THRESHOLD") {
            self.chat.relevance_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("MIN_SIMILARITY") {
            self.retriever.min_similarity = v;
        }
        if let Some(v) = env_list("COUNTRY_LIST") {
            self.chat.countries = v;
        }
        if let Some(v) = env_list("SERVICE_TYPE_LIST") {
            self.chat.service_types = v;
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            if !v.is_empty() {
                self.database.sessions_path = v.into();
            }
        }
        if let Ok(v) = std::env::var("PROFILE_DATABASE_PATH") {
            if !v.is_empty() {
                self.database.profiles_path = v.into();
            }
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            if let Some((host, port)) = v.rsplit_once(':') {
                if let Ok(port) = port.parse() {
                    self.server.host = host.to_owned();
                    self.server.port = port;
                }
            }
        }
        if let Ok(v) = std::env::var("COOKIE_SECRET") {
            if !v.is_empty() {
                self.auth.cookie_secret = Some(v);
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => match v.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(var = name, value = %v, "ignoring unparseable env override");
                None
            }
        },
        _ => None,
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8042
}
fn d_llm_url() -> String {
    "https://api.anthropic.com".into()
}
fn d_llm_model() -> String {
    "claude-3-5-haiku-20241022".into()
}
fn d_emb_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_emb_model() -> String {
    "text-embedding-3-small".into()
}
fn d_sessions_db() -> PathBuf {
    "data/growbal.db".into()
}
fn d_profiles_db() -> PathBuf {
    "data/profiles.db".into()
}
fn d_45() -> u64 {
    45
}
fn d_5() -> usize {
    5
}
fn d_7() -> usize {
    7
}
fn d_0_5() -> f64 {
    0.5
}
fn d_0_7() -> f64 {
    0.7
}
fn d_week_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn d_day_secs() -> u64 {
    24 * 60 * 60
}
fn d_countries() -> Vec<String> {
    ["UAE", "USA", "UK", "Canada", "Saudi Arabia", "Qatar"]
        .map(String::from)
        .to_vec()
}
fn d_service_types() -> Vec<String> {
    [
        "Tax Services",
        "Business Setup Services",
        "Migration/Visa Services",
    ]
    .map(String::from)
    .to_vec()
}
