//! Test support: a scripted LLM provider.
//!
//! Replies are queued ahead of time and popped per call, so tests can
//! script exact pipeline behavior (including failures) without a network.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use gb_domain::error::{Error, Result};
use gb_domain::stream::{BoxStream, StreamEvent};
use gb_llm::traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
};
use gb_llm::LlmClient;

/// One scripted streaming call.
pub enum StreamScript {
    /// Emit these token chunks, then `Done`.
    Tokens(Vec<String>),
    /// Signal `started` when first polled, wait for `gate`, then behave
    /// like `Tokens`. Lets tests take an action mid-evaluation.
    GatedTokens {
        gate: Arc<tokio::sync::Notify>,
        started: Arc<tokio::sync::Notify>,
        chunks: Vec<String>,
    },
    /// Fail stream establishment with this error.
    Fail(Error),
}

#[derive(Default)]
struct Scripts {
    chat_replies: Mutex<VecDeque<Result<String>>>,
    stream_scripts: Mutex<VecDeque<StreamScript>>,
}

/// Cheap-clone scripted provider; clones share the same script queues.
#[derive(Default, Clone)]
pub struct ScriptedLlm {
    scripts: Arc<Scripts>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat_ok(&self, reply: impl Into<String>) -> &Self {
        self.scripts.chat_replies.lock().push_back(Ok(reply.into()));
        self
    }

    pub fn push_chat_err(&self, error: Error) -> &Self {
        self.scripts.chat_replies.lock().push_back(Err(error));
        self
    }

    pub fn push_stream_tokens(&self, chunks: &[&str]) -> &Self {
        self.scripts
            .stream_scripts
            .lock()
            .push_back(StreamScript::Tokens(
                chunks.iter().map(|c| c.to_string()).collect(),
            ));
        self
    }

    /// Queue a streaming reply that tokenizes `text` into small chunks.
    pub fn push_stream_text(&self, text: &str) -> &Self {
        let chunks: Vec<String> = text
            .as_bytes()
            .chunks(7)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        self.scripts
            .stream_scripts
            .lock()
            .push_back(StreamScript::Tokens(chunks));
        self
    }

    pub fn push_stream_err(&self, error: Error) -> &Self {
        self.scripts
            .stream_scripts
            .lock()
            .push_back(StreamScript::Fail(error));
        self
    }

    /// Queue a streaming reply of `text` that signals `started` once the
    /// consumer is reading it and holds the content back until `gate` is
    /// notified.
    pub fn push_stream_gated(
        &self,
        gate: Arc<tokio::sync::Notify>,
        started: Arc<tokio::sync::Notify>,
        text: &str,
    ) -> &Self {
        self.scripts
            .stream_scripts
            .lock()
            .push_back(StreamScript::GatedTokens {
                gate,
                started,
                chunks: vec![text.to_owned()],
            });
        self
    }

    /// A policy client over this provider with test-friendly timing:
    /// millisecond backoff so overload-exhaustion paths run instantly.
    pub fn client(&self) -> LlmClient {
        LlmClient::new(Arc::new(self.clone()) as Arc<dyn LlmProvider>)
            .with_timeout(std::time::Duration::from_secs(5))
            .with_backoff(gb_llm::retry::BackoffPolicy {
                base: std::time::Duration::from_millis(1),
                factor: 2,
                max_attempts: 3,
            })
    }
}

fn token_stream(chunks: Vec<String>) -> BoxStream<'static, Result<StreamEvent>> {
    let mut events: Vec<Result<StreamEvent>> = chunks
        .into_iter()
        .map(|text| Ok(StreamEvent::Token { text }))
        .collect();
    events.push(Ok(StreamEvent::Done {
        usage: None,
        finish_reason: Some("stop".into()),
    }));
    Box::pin(futures_util::stream::iter(events))
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        let next = self
            .scripts
            .chat_replies
            .lock()
            .pop_front()
            .unwrap_or(Err(Error::Other("scripted chat replies exhausted".into())));
        next.map(|content| ChatResponse {
            content,
            usage: None,
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let script = self
            .scripts
            .stream_scripts
            .lock()
            .pop_front()
            .unwrap_or(StreamScript::Fail(Error::Other(
                "scripted stream replies exhausted".into(),
            )));
        match script {
            StreamScript::Fail(e) => Err(e),
            StreamScript::Tokens(chunks) => Ok(token_stream(chunks)),
            StreamScript::GatedTokens { gate, started, chunks } => {
                let stream = async_stream::stream! {
                    started.notify_one();
                    gate.notified().await;
                    for text in chunks {
                        yield Ok(StreamEvent::Token { text });
                    }
                    yield Ok(StreamEvent::Done {
                        usage: None,
                        finish_reason: Some("stop".into()),
                    });
                };
                Ok(Box::pin(stream))
            }
        }
    }

    async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Err(Error::Other("scripted provider has no embeddings".into()))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}
