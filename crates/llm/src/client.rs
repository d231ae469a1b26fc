//! The policy layer above the provider adapters.
//!
//! Agents talk to [`LlmClient`], never to a provider directly. The client
//! owns the per-call timeout, the overload backoff loop, and structured
//! (JSON) completion with its single re-try.

use std::sync::Arc;
use std::time::Duration;

use gb_domain::cancel::CancelToken;
use gb_domain::error::{Error, Result};
use gb_domain::stream::{BoxStream, StreamEvent};
use serde::de::DeserializeOwned;

use crate::retry::{sleep_cancellable, BackoffPolicy};
use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, LlmProvider};

#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    embedder: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
    backoff: BackoffPolicy,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            embedder: None,
            timeout: Duration::from_secs(45),
            backoff: BackoffPolicy::default(),
        }
    }

    /// Route `embed` calls to a dedicated provider (the chat provider has
    /// no embeddings API).
    pub fn with_embedder(mut self, embedder: Arc<dyn LlmProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// One chat completion with timeout and overload backoff. Retries are
    /// idempotent: same prompt, same options.
    pub async fn complete(
        &self,
        req: ChatRequest,
        cancel: &CancelToken,
    ) -> Result<ChatResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            cancel.check()?;

            let result = match tokio::time::timeout(self.timeout, self.provider.chat(req.clone()))
                .await
            {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout(format!(
                    "LLM call exceeded {}s",
                    self.timeout.as_secs()
                ))),
            };

            match result {
                Err(e) if e.is_overloaded() && attempt < self.backoff.max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "LLM overloaded, backing off"
                    );
                    sleep_cancellable(delay, cancel).await?;
                }
                other => return other,
            }
        }
    }

    /// Structured completion: run `complete`, pull the first JSON value out
    /// of the reply and deserialize it. On a parse failure the same prompt
    /// is retried exactly once; a second failure is a `Parse` error.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        req: ChatRequest,
        cancel: &CancelToken,
    ) -> Result<T> {
        let resp = self.complete(req.clone(), cancel).await?;
        match parse_structured::<T>(&resp.content) {
            Ok(value) => Ok(value),
            Err(first_err) => {
                tracing::warn!(error = %first_err, "structured output failed to parse, retrying once");
                cancel.check()?;
                let resp = self.complete(req, cancel).await?;
                parse_structured::<T>(&resp.content).map_err(Error::Parse)
            }
        }
    }

    /// Open a token stream. Backoff applies to stream establishment; once
    /// tokens are flowing, errors surface through the stream itself.
    pub async fn stream(
        &self,
        req: ChatRequest,
        cancel: &CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            cancel.check()?;

            let result =
                match tokio::time::timeout(self.timeout, self.provider.chat_stream(req.clone()))
                    .await
                {
                    Ok(r) => r,
                    Err(_) => Err(Error::Timeout(format!(
                        "LLM stream setup exceeded {}s",
                        self.timeout.as_secs()
                    ))),
                };

            match result {
                Err(e) if e.is_overloaded() && attempt < self.backoff.max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    tracing::warn!(attempt, "LLM overloaded during stream setup, backing off");
                    sleep_cancellable(delay, cancel).await?;
                }
                other => return other,
            }
        }
    }

    /// Embed a batch of texts via the embeddings provider.
    pub async fn embed(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| Error::Config("no embeddings provider configured".into()))?;

        let req = EmbeddingsRequest { input, model: None };
        let resp = tokio::time::timeout(self.timeout, embedder.embeddings(req))
            .await
            .map_err(|_| Error::Timeout("embeddings call timed out".into()))??;
        Ok(resp.embeddings)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structured output parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deserialize the first JSON value found in an LLM reply.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    let json = extract_json(text).ok_or_else(|| "no JSON value in reply".to_string())?;
    serde_json::from_str(json).map_err(|e| e.to_string())
}

/// Locate the first complete JSON object or array in `text`.
///
/// Models often wrap JSON in prose or code fences; this scans for the first
/// opening brace/bracket and matches it, honoring string literals and
/// escapes.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
