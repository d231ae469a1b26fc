//! The conversational responder: one short LLM call, no retrieval.

use gb_domain::cancel::CancelToken;
use gb_domain::error::{Error, Result};
use gb_llm::LlmClient;

use crate::prompts;

/// Upper bound on a conversational reply.
const MAX_REPLY_CHARS: usize = 600;

#[derive(Clone)]
pub struct ConversationalResponder {
    llm: LlmClient,
}

impl ConversationalResponder {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Produce a short reply. LLM failures fall back to deterministic
    /// templates; only cancellation propagates as an error.
    pub async fn respond(
        &self,
        message: &str,
        country: &str,
        service_type: &str,
        recent_turns: &[(String, String)],
        cancel: &CancelToken,
    ) -> Result<String> {
        let mut history_text = String::new();
        for (user, assistant) in recent_turns.iter().rev().take(3).rev() {
            history_text.push_str(&format!("User: {user}\nAssistant: {assistant}\n"));
        }

        let req = prompts::conversational_request(message, country, service_type, &history_text);
        match self.llm.complete(req, cancel).await {
            Ok(resp) => Ok(cap_length(resp.content.trim())),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "conversational call failed, using template");
                Ok(fallback_response(message, country, service_type))
            }
        }
    }
}

fn cap_length(reply: &str) -> String {
    if reply.chars().count() <= MAX_REPLY_CHARS {
        reply.to_owned()
    } else {
        reply.chars().take(MAX_REPLY_CHARS).collect()
    }
}

/// Deterministic template keyed by the user message.
fn fallback_response(message: &str, country: &str, service_type: &str) -> String {
    let message = message.to_lowercase();
    let service = service_type.to_lowercase();
    if ["hello", "hi", "hey"].iter().any(|g| message.contains(g)) {
        format!(
            "Hello! I'm here to help you find {service} providers in {country}. \
             What specific services are you looking for?"
        )
    } else if message.contains("thank") {
        "You're welcome! Let me know if you need help finding any other service providers."
            .to_owned()
    } else {
        format!(
            "I can help you search for {service} providers in {country}. \
             Just tell me what specific services you need."
        )
    }
}
