//! End-to-end turn scenarios over the full orchestrated pipeline, with a
//! scripted LLM and an in-memory profile index. No network, no disk.

use std::sync::Arc;

use uuid::Uuid;

use gb_agents::events::{TurnEvent, WorkflowEvent};
use gb_agents::testing::ScriptedLlm;
use gb_agents::{Multiplexer, Orchestrator, TurnRequest, Workflow};
use gb_domain::cancel::CancelToken;
use gb_retriever::{MemoryProfileIndex, Retriever};
use gb_sessions::{MessageRole, SessionStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn setup(llm: &ScriptedLlm, profile_count: usize) -> (Orchestrator, Uuid, SessionStore) {
    let store = SessionStore::open_in_memory().await.unwrap();
    let (session, _) = store
        .get_or_create(None, Some(1), "UAE", "Tax Services")
        .await
        .unwrap();

    let mut index = MemoryProfileIndex::new();
    for id in 1..=profile_count as i64 {
        index.insert(
            id,
            &format!(
                "Company Name: Firm {id}\nCountry: UAE\nProvider Type: Accounting Firm\n\
                 Growbal Link: https://growbal.example/p/{id}\n\
                 accounting firms for tech startups tax services"
            ),
            &["tax", "accounting"],
        );
    }
    let retriever = Retriever::new(Arc::new(index));
    let workflow = Workflow::new(llm.client(), retriever, 0.7, 0.0);
    let orchestrator = Orchestrator::new(llm.client(), store.clone(), workflow, 5, 7);
    (orchestrator, session.session_id, store)
}

async fn run_turn(
    orchestrator: &Orchestrator,
    session_id: Uuid,
    message: &str,
) -> Vec<TurnEvent> {
    let mut rx = orchestrator.handle(
        TurnRequest {
            message: message.into(),
            session_id,
            country: "UAE".into(),
            service_type: "Tax Services".into(),
        },
        CancelToken::new(),
    );
    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }
    events
}

fn search_decision() -> &'static str {
    r#"{"tool_needed": true, "tool": "search", "summary": "Find Tax Services providers in UAE: accounting firms for tech startups", "direct_response": null}"#
}

fn semantic_strategy() -> &'static str {
    r#"{"strategy":"semantic","extracted_tags":[],"rewritten_query":"a provider offering accounting and tax services to tech startups","rationale":"natural language"}"#
}

fn relevant_verdict() -> &'static str {
    r#"{"relevance_score": 0.9, "reasoning": "strong service match for startup accounting", "is_relevant": true, "confidence_level": 0.9}"#
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn search_turn_with_three_relevant_candidates() {
    let llm = ScriptedLlm::new();
    llm.push_chat_ok(search_decision());
    llm.push_chat_ok(semantic_strategy());
    for _ in 0..3 {
        llm.push_stream_text(relevant_verdict());
    }
    llm.push_chat_ok(
        r#"{"executive_summary": "Three UAE accounting firms fit tech startups well.",
            "provider_recommendations": ["**[Firm 1](https://growbal.example/p/1)** - deep startup focus", "Firm 2 - solid generalist", "Firm 3 - budget option"],
            "key_insights": ["All three are UAE-based", "Strong tax specialization"],
            "summary_statistics": {}}"#,
    );

    let (orchestrator, session_id, store) = setup(&llm, 3).await;
    let events = run_turn(&orchestrator, session_id, "Find accounting firms for tech startups").await;

    // Analysis preamble first, exactly one terminal, terminal last.
    assert!(matches!(events.first().unwrap(), TurnEvent::Analysis { .. }));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    let TurnEvent::Workflow(WorkflowEvent::Complete { summary, statistics }) =
        events.last().unwrap()
    else {
        panic!("expected workflow complete terminal");
    };
    assert_eq!(summary.provider_recommendations.len(), 3);
    assert_eq!(summary.summary_statistics.total_providers, 3);
    assert_eq!(statistics.relevant_found, 3);

    // Persisted assistant content equals the multiplexer's last final frame
    // and carries the summary, all three recommendations and statistics.
    let mut mux = Multiplexer::new();
    for event in &events {
        mux.frame(event);
    }
    let history = store.history(session_id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    let assistant = &history[1];
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert_eq!(assistant.content, mux.last_final().unwrap());
    assert!(assistant.content.contains("Three UAE accounting firms"));
    assert!(assistant.content.contains("Firm 1"));
    assert!(assistant.content.contains("3. Firm 3"));
}

#[tokio::test]
async fn search_turn_with_no_candidates() {
    let llm = ScriptedLlm::new();
    llm.push_chat_ok(search_decision());
    llm.push_chat_ok(semantic_strategy());

    let (orchestrator, session_id, store) = setup(&llm, 0).await;
    let events = run_turn(&orchestrator, session_id, "Find accounting firms for tech startups").await;

    let terminals: Vec<&TurnEvent> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminals.len(), 1);
    let wire = terminals[0].to_wire();
    assert_eq!(wire["type"], "complete");
    assert_eq!(wire["no_results"], true);
    assert_eq!(wire["message"], "No candidate profiles found");
    assert_eq!(wire["statistics"]["candidates_found"], 0);

    // No adjudication or summarization frames at all.
    assert!(!events.iter().any(|e| {
        let agent = e.to_wire()["agent"].clone();
        agent == "adjudicator" || agent == "summarizer"
    }));

    // The deterministic no-results text is persisted.
    let history = store.history(session_id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[1]
        .content
        .starts_with("No relevant service providers found"));
    assert!(history[1].content.contains("0 candidate(s) evaluated"));
}

#[tokio::test]
async fn greeting_routes_to_conversational_without_workflow() {
    let llm = ScriptedLlm::new();
    llm.push_chat_ok(
        r#"{"tool_needed": true, "tool": "conversational", "summary": "greeting", "direct_response": null}"#,
    );
    llm.push_chat_ok("Hello! I can help you find tax services providers in UAE.");

    let (orchestrator, session_id, store) = setup(&llm, 3).await;
    let events = run_turn(&orchestrator, session_id, "hello").await;

    assert_eq!(events.len(), 1);
    let wire = events[0].to_wire();
    assert_eq!(wire["type"], "final");

    let history = store.history(session_id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[1].content.starts_with("Hello!"));
}

#[tokio::test]
async fn overload_throughout_leaves_only_the_user_message() {
    let llm = ScriptedLlm::new();
    llm.push_chat_ok(search_decision());
    for _ in 0..3 {
        llm.push_chat_err(gb_domain::error::Error::Overloaded("529".into()));
    }

    let (orchestrator, session_id, store) = setup(&llm, 3).await;
    let events = run_turn(&orchestrator, session_id, "find firms").await;

    let wire = events.last().unwrap().to_wire();
    assert_eq!(wire["type"], "error");
    assert_eq!(wire["error"], "overloaded");

    let history = store.history(session_id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, MessageRole::User);
}

#[tokio::test]
async fn second_turn_sees_prior_transcript() {
    let llm = ScriptedLlm::new();
    // Turn 1: conversational.
    llm.push_chat_ok(
        r#"{"tool_needed": true, "tool": "conversational", "summary": "greeting", "direct_response": null}"#,
    );
    llm.push_chat_ok("Hi! Ask away.");
    // Turn 2: conversational again.
    llm.push_chat_ok(
        r#"{"tool_needed": true, "tool": "conversational", "summary": "thanks", "direct_response": null}"#,
    );
    llm.push_chat_ok("You're welcome!");

    let (orchestrator, session_id, store) = setup(&llm, 0).await;
    run_turn(&orchestrator, session_id, "hello").await;
    run_turn(&orchestrator, session_id, "thanks!").await;

    let turns = store.history_as_turns(session_id).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].0.content, "hello");
    assert_eq!(turns[0].1.content, "Hi! Ask away.");
    assert_eq!(turns[1].1.content, "You're welcome!");

    // seq is contiguous across the whole session.
    let history = store.history(session_id, 10).await.unwrap();
    let seqs: Vec<i64> = history.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
}
