//! The per-turn orchestrator.
//!
//! Persists the user turn, classifies it (search vs. conversational),
//! delegates to the workflow or the responder, and persists the
//! assistant's final content (the last `final` frame surfaced by the
//! multiplexer) once the turn terminates.

use tokio::sync::mpsc;
use uuid::Uuid;

use gb_domain::cancel::CancelToken;
use gb_domain::error::Error;
use gb_domain::model::{OrchestratorDecision, RoutedTool};
use gb_llm::LlmClient;
use gb_sessions::{MessageRole, SessionStore};

use crate::conversational::ConversationalResponder;
use crate::events::{error_fields, TurnEvent, WorkflowEvent};
use crate::multiplex::Multiplexer;
use crate::prompts;
use crate::workflow::Workflow;
use crate::CHANNEL_CAPACITY;

/// Persisted assistant marker for a turn cancelled before any final
/// content was decided.
pub const CANCELLED_MARKER: &str = "[cancelled]";

/// One inbound user turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub message: String,
    pub session_id: Uuid,
    pub country: String,
    pub service_type: String,
}

#[derive(Clone)]
pub struct Orchestrator {
    llm: LlmClient,
    store: SessionStore,
    workflow: Workflow,
    conversational: ConversationalResponder,
    history_turns: usize,
    max_results: usize,
}

impl Orchestrator {
    pub fn new(
        llm: LlmClient,
        store: SessionStore,
        workflow: Workflow,
        history_turns: usize,
        max_results: usize,
    ) -> Self {
        Self {
            conversational: ConversationalResponder::new(llm.clone()),
            llm,
            store,
            workflow,
            history_turns,
            max_results,
        }
    }

    /// Handle one turn. Events arrive on the returned channel; the last
    /// event is terminal (`final`, workflow terminal, `error` or
    /// `cancelled`).
    pub fn handle(&self, request: TurnRequest, cancel: CancelToken) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.handle_inner(request, tx, cancel).await;
        });
        rx
    }

    async fn handle_inner(
        &self,
        request: TurnRequest,
        tx: mpsc::Sender<TurnEvent>,
        cancel: CancelToken,
    ) {
        // The user turn is durable before any LLM work happens.
        if let Err(e) = self
            .store
            .append_message(request.session_id, MessageRole::User, &request.message)
            .await
        {
            tracing::error!(error = %e, session_id = %request.session_id, "failed to persist user turn");
            let (error, message) = error_fields(&e);
            let _ = tx.send(TurnEvent::Error { error, message }).await;
            return;
        }

        // Compact transcript of the most recent prior turns. The turn we
        // just appended is unpaired, so it never shows up here.
        let recent: Vec<(String, String)> = match self.store.history_as_turns(request.session_id).await
        {
            Ok(turns) => turns
                .into_iter()
                .rev()
                .take(self.history_turns)
                .rev()
                .map(|(user, assistant)| (user.content, assistant.content))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load history, continuing without");
                Vec::new()
            }
        };
        let transcript = render_transcript(&recent);

        let decision = match self
            .llm
            .complete_json::<OrchestratorDecision>(
                prompts::classification_request(
                    &request.message,
                    &transcript,
                    &request.country,
                    &request.service_type,
                ),
                &cancel,
            )
            .await
        {
            Ok(decision) => decision,
            Err(Error::Cancelled) => {
                self.persist_assistant(request.session_id, CANCELLED_MARKER).await;
                let _ = tx.send(TurnEvent::Cancelled).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "classification failed, using heuristic routing");
                heuristic_decision(&request.message, &request.country, &request.service_type)
            }
        };

        // A confident direct answer skips both tools.
        if !decision.tool_needed {
            let content = decision
                .direct_response
                .unwrap_or_else(|| decision.summary.clone());
            let _ = tx.send(TurnEvent::Final { content: content.clone() }).await;
            self.persist_assistant(request.session_id, &content).await;
            return;
        }

        match decision.tool.unwrap_or(RoutedTool::Search) {
            RoutedTool::Conversational => {
                self.run_conversational(&request, &recent, tx, cancel).await;
            }
            RoutedTool::Search => {
                self.run_search(&request, &transcript, decision.summary, tx, cancel)
                    .await;
            }
        }
    }

    async fn run_conversational(
        &self,
        request: &TurnRequest,
        recent: &[(String, String)],
        tx: mpsc::Sender<TurnEvent>,
        cancel: CancelToken,
    ) {
        match self
            .conversational
            .respond(
                &request.message,
                &request.country,
                &request.service_type,
                recent,
                &cancel,
            )
            .await
        {
            Ok(content) => {
                let _ = tx.send(TurnEvent::Final { content: content.clone() }).await;
                self.persist_assistant(request.session_id, &content).await;
            }
            Err(_) => {
                self.persist_assistant(request.session_id, CANCELLED_MARKER).await;
                let _ = tx.send(TurnEvent::Cancelled).await;
            }
        }
    }

    async fn run_search(
        &self,
        request: &TurnRequest,
        transcript: &str,
        summary: String,
        tx: mpsc::Sender<TurnEvent>,
        cancel: CancelToken,
    ) {
        let _ = tx.send(TurnEvent::Analysis { summary }).await;

        let context = compose_context(&request.country, &request.service_type, transcript);
        let mut workflow_rx = self.workflow.run(
            request.message.clone(),
            Some(context),
            self.max_results,
            cancel.clone(),
        );

        #[derive(PartialEq)]
        enum Outcome {
            Persist,
            Skip,
            Cancelled,
        }

        let mut mux = Multiplexer::new();
        let mut outcome = Outcome::Cancelled;
        let mut consumer_gone = false;

        while let Some(event) = workflow_rx.recv().await {
            if event.is_terminal() {
                outcome = match &event {
                    WorkflowEvent::Complete { .. } | WorkflowEvent::NoResults { .. } => {
                        Outcome::Persist
                    }
                    WorkflowEvent::Error { .. } => Outcome::Skip,
                    _ => Outcome::Cancelled,
                };
            }
            let turn_event = TurnEvent::Workflow(event);
            mux.frame(&turn_event);
            if !consumer_gone && tx.send(turn_event).await.is_err() {
                // Client went away; keep draining so the workflow can
                // finish or observe the cancellation.
                consumer_gone = true;
            }
        }

        match outcome {
            Outcome::Persist => {
                if let Some(text) = mux.last_final() {
                    let text = text.to_owned();
                    self.persist_assistant(request.session_id, &text).await;
                }
            }
            // Failed turns keep only the user message.
            Outcome::Skip => {}
            Outcome::Cancelled => {
                let content = mux
                    .last_final()
                    .map(|t| t.to_owned())
                    .unwrap_or_else(|| CANCELLED_MARKER.to_owned());
                self.persist_assistant(request.session_id, &content).await;
            }
        }
    }

    async fn persist_assistant(&self, session_id: Uuid, content: &str) {
        if let Err(e) = self
            .store
            .append_message(session_id, MessageRole::Assistant, content)
            .await
        {
            tracing::error!(error = %e, session_id = %session_id, "failed to persist assistant turn");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn render_transcript(turns: &[(String, String)]) -> String {
    let mut out = String::new();
    for (user, assistant) in turns {
        out.push_str(&format!("User: {user}\nAssistant: {assistant}\n"));
    }
    out
}

/// The system prompt that pins the session's constraints for the workflow.
fn compose_context(country: &str, service_type: &str, transcript: &str) -> String {
    let mut context = format!(
        "You are assisting a user of a service provider discovery platform.\n\
         Hard constraints for this session:\n\
         - Country: {country}\n\
         - Service Type: {service_type}\n\
         Only providers matching these constraints are acceptable."
    );
    if !transcript.is_empty() {
        context.push_str(&format!("\n\nRecent conversation:\n{transcript}"));
    }
    context
}

/// Keyword routing used when the classification call fails.
fn heuristic_decision(message: &str, country: &str, service_type: &str) -> OrchestratorDecision {
    const CONVERSATIONAL: [&str; 8] =
        ["hello", "hi", "hey", "thanks", "thank you", "what", "how", "why"];
    const SEARCH: [&str; 6] = ["find", "search", "looking for", "need", "show me", "locate"];

    let lowered = message.to_lowercase();
    let is_conversational = CONVERSATIONAL.iter().any(|p| lowered.contains(p));
    let is_search = SEARCH.iter().any(|p| lowered.contains(p));

    if is_conversational && !is_search {
        OrchestratorDecision {
            tool_needed: true,
            tool: Some(RoutedTool::Conversational),
            summary: format!("Conversational message: {message}"),
            direct_response: None,
        }
    } else {
        OrchestratorDecision {
            tool_needed: true,
            tool: Some(RoutedTool::Search),
            summary: format!("Find {service_type} providers in {country}: {message}"),
            direct_response: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::ScriptedLlm;
    use gb_retriever::{MemoryProfileIndex, Retriever};
    use gb_sessions::SessionStore;

    async fn setup(llm: &ScriptedLlm, profile_count: usize) -> (Orchestrator, Uuid, SessionStore) {
        let store = SessionStore::open_in_memory().await.unwrap();
        let (session, _) = store
            .get_or_create(Some(Uuid::new_v4()), None, "UAE", "Tax Services")
            .await
            .unwrap();

        let mut index = MemoryProfileIndex::new();
        for id in 1..=profile_count as i64 {
            index.insert(
                id,
                &format!(
                    "Company Name: Firm {id}\nCountry: UAE\nProvider Type: Accounting Firm\n\
                     tax accounting services"
                ),
                &["tax"],
            );
        }
        let retriever = Retriever::new(Arc::new(index));
        let workflow = Workflow::new(llm.client(), retriever, 0.7, 0.0);
        let orchestrator = Orchestrator::new(llm.client(), store.clone(), workflow, 5, 7);
        (orchestrator, session.session_id, store)
    }

    async fn collect(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    fn request(session_id: Uuid, message: &str) -> TurnRequest {
        TurnRequest {
            message: message.into(),
            session_id,
            country: "UAE".into(),
            service_type: "Tax Services".into(),
        }
    }

    #[tokio::test]
    async fn conversational_turn_emits_single_final_and_persists() {
        let llm = ScriptedLlm::new();
        llm.push_chat_ok(
            r#"{"tool_needed": true, "tool": "conversational", "summary": "greeting", "direct_response": null}"#,
        );
        llm.push_chat_ok("Hello! Ask me about tax providers whenever you're ready.");

        let (orchestrator, session_id, store) = setup(&llm, 0).await;
        let events =
            collect(orchestrator.handle(request(session_id, "hello"), CancelToken::new())).await;

        assert_eq!(events.len(), 1);
        let TurnEvent::Final { content } = &events[0] else {
            panic!("expected final");
        };
        assert!(content.starts_with("Hello!"));

        let history = store.history(session_id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert_eq!(history[1].content, *content);
    }

    #[tokio::test]
    async fn search_turn_persists_the_last_final_frame() {
        let llm = ScriptedLlm::new();
        llm.push_chat_ok(
            r#"{"tool_needed": true, "tool": "search", "summary": "Find Tax Services providers in UAE: accounting", "direct_response": null}"#,
        );
        llm.push_chat_ok(
            r#"{"strategy":"semantic","extracted_tags":[],"rewritten_query":"a provider offering tax accounting services","rationale":"natural"}"#,
        );
        llm.push_stream_text(
            r#"{"relevance_score": 0.9, "reasoning": "service match", "is_relevant": true, "confidence_level": 0.9}"#,
        );
        llm.push_chat_ok(
            r#"{"executive_summary": "Firm 1 is a strong fit.", "provider_recommendations": ["Firm 1"], "key_insights": ["Local"], "summary_statistics": {}}"#,
        );

        let (orchestrator, session_id, store) = setup(&llm, 1).await;
        let events = collect(
            orchestrator.handle(request(session_id, "find accounting help"), CancelToken::new()),
        )
        .await;

        assert!(matches!(events.first().unwrap(), TurnEvent::Analysis { .. }));
        assert!(events.last().unwrap().is_terminal());

        let history = store.history(session_id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        let assistant = &history[1];
        assert!(assistant.content.starts_with("Firm 1 is a strong fit."));
        assert!(assistant.content.contains("**Recommendations:**"));
    }

    #[tokio::test]
    async fn heuristic_routes_greeting_when_classifier_fails() {
        let llm = ScriptedLlm::new();
        llm.push_chat_err(Error::Http("500".into()));
        // The responder call also fails, exercising the template.
        llm.push_chat_err(Error::Http("500".into()));

        let (orchestrator, session_id, store) = setup(&llm, 0).await;
        let events =
            collect(orchestrator.handle(request(session_id, "hey there"), CancelToken::new()))
                .await;

        let TurnEvent::Final { content } = events.last().unwrap() else {
            panic!("expected final");
        };
        assert!(content.starts_with("Hello!"));
        assert_eq!(store.history(session_id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn workflow_error_keeps_only_the_user_message() {
        let llm = ScriptedLlm::new();
        llm.push_chat_ok(
            r#"{"tool_needed": true, "tool": "search", "summary": "s", "direct_response": null}"#,
        );
        // Strategy call overloaded through all retries.
        for _ in 0..3 {
            llm.push_chat_err(Error::Overloaded("529".into()));
        }

        let (orchestrator, session_id, store) = setup(&llm, 1).await;
        let events =
            collect(orchestrator.handle(request(session_id, "find firms"), CancelToken::new()))
                .await;

        let TurnEvent::Workflow(WorkflowEvent::Error { error, .. }) = events.last().unwrap()
        else {
            panic!("expected workflow error terminal, got {:?}", events.last());
        };
        assert_eq!(error, "overloaded");

        let history = store.history(session_id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn direct_response_skips_both_tools() {
        let llm = ScriptedLlm::new();
        llm.push_chat_ok(
            r#"{"tool_needed": false, "tool": null, "summary": "meta", "direct_response": "I can search for providers once you tell me what you need."}"#,
        );

        let (orchestrator, session_id, store) = setup(&llm, 0).await;
        let events = collect(
            orchestrator.handle(request(session_id, "what is this"), CancelToken::new()),
        )
        .await;

        assert_eq!(events.len(), 1);
        let history = store.history(session_id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[1].content.starts_with("I can search"));
    }

    #[test]
    fn heuristic_keyword_sets() {
        let greeting = heuristic_decision("hello", "UAE", "Tax Services");
        assert_eq!(greeting.tool, Some(RoutedTool::Conversational));

        // Search verbs win over conversational words.
        let mixed = heuristic_decision("hi, find me tax firms", "UAE", "Tax Services");
        assert_eq!(mixed.tool, Some(RoutedTool::Search));
        assert_eq!(
            mixed.summary,
            "Find Tax Services providers in UAE: hi, find me tax firms"
        );
    }
}
