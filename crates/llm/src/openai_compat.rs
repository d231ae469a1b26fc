//! OpenAI-compatible adapter (`/chat/completions` + `/embeddings`).
//!
//! In production this provider powers embeddings for the semantic profile
//! index; the chat path exists for deployments that point `base_url` at any
//! OpenAI-compatible server.

use gb_domain::config::EmbeddingsConfig;
use gb_domain::error::{Error, Result};
use gb_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;

use crate::sse::sse_response_stream;
use crate::traits::{
    ChatRequest, ChatResponse, ChatRole, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
};
use crate::util::{from_reqwest, status_to_error};

pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &EmbeddingsConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("EMBEDDINGS_API_KEY is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.model.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| Error::Parse("response has no choices".into()))?;

    let content = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .map(|s| s.to_string());

    let model = body
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown")
        .to_string();

    let usage = body.get("usage").and_then(|u| {
        Some(Usage {
            prompt_tokens: u.get("prompt_tokens")?.as_u64()? as u32,
            completion_tokens: u.get("completion_tokens")?.as_u64()? as u32,
            total_tokens: u.get("total_tokens")?.as_u64()? as u32,
        })
    });

    Ok(ChatResponse {
        content,
        usage,
        model,
        finish_reason,
    })
}

fn parse_chat_sse(data: &str, done_emitted: &mut bool) -> Vec<Result<StreamEvent>> {
    if data == "[DONE]" {
        if !*done_emitted {
            *done_emitted = true;
            return vec![Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            })];
        }
        return Vec::new();
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut events = Vec::new();
    if let Some(text) = v
        .pointer("/choices/0/delta/content")
        .and_then(|t| t.as_str())
    {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }
    if let Some(reason) = v
        .pointer("/choices/0/finish_reason")
        .and_then(|r| r.as_str())
    {
        *done_emitted = true;
        events.push(Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some(reason.to_string()),
        }));
    }
    events
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req, false);

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(status_to_error("openai-compat", status.as_u16(), &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&resp_json)
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req, true);

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(status_to_error("openai-compat", status.as_u16(), &err_text));
        }

        let mut done_emitted = false;
        Ok(sse_response_stream(resp, move |data| {
            parse_chat_sse(data, &mut done_emitted)
        }))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "input": req.input,
        });

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(status_to_error("openai-compat", status.as_u16(), &resp_text));
        }

        let v: Value = serde_json::from_str(&resp_text)?;
        let data = v
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::Parse("embeddings response has no data array".into()))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let vector = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| Error::Parse("embeddings item has no vector".into()))?
                .iter()
                .filter_map(|f| f.as_f64().map(|f| f as f32))
                .collect();
            embeddings.push(vector);
        }

        Ok(EmbeddingsResponse { embeddings })
    }

    fn provider_id(&self) -> &str {
        "openai-compat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_non_streaming_choice() {
        let body: Value = serde_json::from_str(
            r#"{
                "model": "test",
                "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
            }"#,
        )
        .unwrap();
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn sse_done_sentinel() {
        let mut done = false;
        let events = parse_chat_sse("[DONE]", &mut done);
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Done { .. }));
        // A second sentinel does not emit again.
        assert!(parse_chat_sse("[DONE]", &mut done).is_empty());
    }

    #[test]
    fn sse_delta_content() {
        let mut done = false;
        let events = parse_chat_sse(
            r#"{"choices":[{"delta":{"content":"tok"},"finish_reason":null}]}"#,
            &mut done,
        );
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Token { text } if text == "tok"
        ));
    }
}
