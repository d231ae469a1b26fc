/// Shared error type used across all Growbal crates.
///
/// Variants map onto the platform's error kinds: `Cancelled` and
/// `Overloaded` drive retry/abort policy in the LLM client, `Parse`
/// triggers the deterministic fallbacks in the agents, and
/// `NotFound`/`Forbidden`/`SessionClosed` surface as HTTP statuses.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("database: {0}")]
    Db(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("upstream overloaded: {0}")]
    Overloaded(String),

    #[error("cancelled")]
    Cancelled,

    #[error("malformed structured output: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the LLM client should retry this error with backoff.
    pub fn is_overloaded(&self) -> bool {
        matches!(self, Error::Overloaded(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The user-visible message template for this error kind.
    ///
    /// Terminal errors shown in the chat stream go through this so that no
    /// internal detail or stack trace ever reaches the client.
    pub fn user_message(&self) -> String {
        match self {
            Error::Overloaded(_) => {
                "The service is experiencing heavy load right now. Please try again shortly."
                    .into()
            }
            Error::Cancelled => "The request was cancelled.".into(),
            Error::Timeout(_) => {
                "The request took too long to complete. Please try again.".into()
            }
            Error::NotFound(_) => "The requested session could not be found.".into(),
            Error::Forbidden(_) => "You do not have access to this session.".into(),
            Error::SessionClosed(_) => {
                "This conversation has been closed. Please start a new one.".into()
            }
            _ => "Something went wrong on our side. Please try again.".into(),
        }
    }
}
