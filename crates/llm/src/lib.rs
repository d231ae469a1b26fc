//! LLM client layer.
//!
//! Provider adapters translate between our internal request/response types
//! and each provider's HTTP wire format; [`client::LlmClient`] sits above
//! them and owns policy: per-call timeouts, overload backoff, and
//! schema-validated structured completion.

pub mod anthropic;
pub mod client;
pub mod openai_compat;
pub mod retry;
pub mod sse;
pub mod traits;
pub mod util;

pub use anthropic::AnthropicProvider;
pub use client::LlmClient;
pub use openai_compat::OpenAiCompatProvider;
pub use traits::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, EmbeddingsRequest, EmbeddingsResponse,
    LlmProvider,
};
