//! Integration tests for the client policy layer (backoff, structured
//! retry, cancellation) using a scripted provider. No network.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use gb_domain::cancel::CancelToken;
use gb_domain::error::{Error, Result};
use gb_domain::stream::{BoxStream, StreamEvent};
use gb_llm::traits::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
};
use gb_llm::LlmClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<u32>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        *self.calls.lock() += 1;
        let next = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or(Err(Error::Other("script exhausted".into())));
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
        unimplemented!("not exercised")
    }

    async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        unimplemented!("not exercised")
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

fn request() -> ChatRequest {
    ChatRequest {
        messages: vec![ChatMessage::user("hello")],
        ..Default::default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backoff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn overload_retried_then_succeeds() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(Error::Overloaded("529".into())),
        Err(Error::Overloaded("529".into())),
        Ok("recovered".into()),
    ]));
    let client = LlmClient::new(provider.clone());

    let resp = client.complete(request(), &CancelToken::new()).await.unwrap();
    assert_eq!(resp.content, "recovered");
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn overload_exhaustion_surfaces_overloaded() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(Error::Overloaded("529".into())),
        Err(Error::Overloaded("529".into())),
        Err(Error::Overloaded("529".into())),
        Ok("never reached".into()),
    ]));
    let client = LlmClient::new(provider.clone());

    let err = client.complete(request(), &CancelToken::new()).await.unwrap_err();
    assert!(err.is_overloaded());
    // max_attempts = 3: no fourth call.
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn non_overload_errors_are_not_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(Error::Http("500".into())),
        Ok("never reached".into()),
    ]));
    let client = LlmClient::new(provider.clone());

    let err = client.complete(request(), &CancelToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Http(_)));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_call_short_circuits() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok("unused".into())]));
    let client = LlmClient::new(provider.clone());

    let cancel = CancelToken::new();
    cancel.cancel();

    let err = client.complete(request(), &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(provider.call_count(), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structured completion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct Shape {
    value: i64,
}

#[tokio::test(start_paused = true)]
async fn structured_retry_once_then_parse_error() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok("not json at all".into()),
        Ok("still not json".into()),
    ]));
    let client = LlmClient::new(provider.clone());

    let err = client
        .complete_json::<Shape>(request(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn structured_second_attempt_can_succeed() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok("garbage".into()),
        Ok(r#"The answer: {"value": 42}"#.into()),
    ]));
    let client = LlmClient::new(provider.clone());

    let shape = client
        .complete_json::<Shape>(request(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(shape.value, 42);
}
