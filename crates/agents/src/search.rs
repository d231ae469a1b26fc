//! Stage 1: the search agent.
//!
//! Picks a retrieval strategy with one LLM call, executes it against the
//! profile retriever, and streams progress.

use tokio::sync::mpsc;

use gb_domain::cancel::CancelToken;
use gb_domain::error::Error;
use gb_domain::model::{SearchStrategy, StrategyDecision};
use gb_llm::LlmClient;
use gb_retriever::Retriever;

use crate::events::{error_fields, SearchEvent};
use crate::prompts;
use crate::CHANNEL_CAPACITY;

#[derive(Clone)]
pub struct SearchAgent {
    llm: LlmClient,
    retriever: Retriever,
}

impl SearchAgent {
    pub fn new(llm: LlmClient, retriever: Retriever) -> Self {
        Self { llm, retriever }
    }

    /// Run one search. Events arrive on the returned channel; the final
    /// event is either `complete` or `error`.
    pub fn run(
        &self,
        query: String,
        context: Option<String>,
        max_results: usize,
        min_similarity: f64,
        cancel: CancelToken,
    ) -> mpsc::Receiver<SearchEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let agent = self.clone();
        tokio::spawn(async move {
            agent
                .run_inner(query, context, max_results, min_similarity, tx, cancel)
                .await;
        });
        rx
    }

    async fn run_inner(
        &self,
        query: String,
        context: Option<String>,
        max_results: usize,
        min_similarity: f64,
        tx: mpsc::Sender<SearchEvent>,
        cancel: CancelToken,
    ) {
        if cancel.is_cancelled() {
            return;
        }

        let _ = tx
            .send(SearchEvent::StrategyStart {
                message: "Analyzing query to determine best search strategy...".into(),
            })
            .await;

        // Strategy decision. A malformed reply falls back to semantic
        // search over the user's own wording; harder failures terminate
        // the stream so the workflow can surface them.
        let decision = match self
            .llm
            .complete_json::<StrategyDecision>(
                prompts::strategy_request(&query, context.as_deref()),
                &cancel,
            )
            .await
        {
            Ok(decision) => decision,
            Err(Error::Cancelled) => return,
            Err(Error::Parse(e)) => {
                tracing::warn!(error = %e, "strategy output unparseable, falling back to semantic");
                StrategyDecision::fallback(&query)
            }
            Err(e) => {
                tracing::warn!(error = %e, "strategy call failed");
                let (kind, message) = error_fields(&e);
                let _ = tx.send(SearchEvent::Error { error: kind, message }).await;
                return;
            }
        };

        let _ = tx
            .send(SearchEvent::StrategyComplete {
                strategy: decision.strategy,
                extracted_tags: decision.extracted_tags.clone(),
                rewritten_query: decision.rewritten_query.clone(),
                rationale: decision.rationale.clone(),
            })
            .await;

        if cancel.is_cancelled() {
            return;
        }

        let _ = tx
            .send(SearchEvent::SearchStart {
                message: format!("Executing {} search...", decision.strategy.as_str()),
                strategy: decision.strategy,
            })
            .await;

        // Dispatch. Tag and hybrid strategies require extracted tags;
        // otherwise semantic with the rewritten query.
        let result = match decision.strategy {
            SearchStrategy::Tags if !decision.extracted_tags.is_empty() => {
                self.retriever
                    .search_tags(&decision.extracted_tags, false, max_results)
                    .await
            }
            SearchStrategy::Hybrid if !decision.extracted_tags.is_empty() => {
                self.retriever
                    .search_hybrid(&decision.rewritten_query, &decision.extracted_tags, max_results)
                    .await
            }
            _ => {
                self.retriever
                    .search_semantic(&decision.rewritten_query, max_results, min_similarity)
                    .await
            }
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed");
                let (kind, message) = error_fields(&e);
                let _ = tx.send(SearchEvent::Error { error: kind, message }).await;
                return;
            }
        };

        let _ = tx
            .send(SearchEvent::SearchProgress {
                found_profiles: output.candidate_profiles.len(),
                total_searched: output.total_profiles_searched,
            })
            .await;

        let _ = tx.send(SearchEvent::Complete { data: output }).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::ScriptedLlm;
    use gb_retriever::MemoryProfileIndex;

    fn retriever() -> Retriever {
        let mut index = MemoryProfileIndex::new();
        index.insert(
            1,
            "Company Name: Acme Tax\nCountry: UAE\ntax accounting services startups",
            &["tax"],
        );
        index.insert(
            2,
            "Company Name: Borealis Legal\nCountry: UAE\ncorporate legal counsel",
            &["legal"],
        );
        Retriever::new(Arc::new(index))
    }

    async fn collect(mut rx: mpsc::Receiver<SearchEvent>) -> Vec<SearchEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    fn type_names(events: &[SearchEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                SearchEvent::StrategyStart { .. } => "strategy_start",
                SearchEvent::StrategyComplete { .. } => "strategy_complete",
                SearchEvent::SearchStart { .. } => "search_start",
                SearchEvent::SearchProgress { .. } => "search_progress",
                SearchEvent::Complete { .. } => "complete",
                SearchEvent::Error { .. } => "error",
            })
            .collect()
    }

    #[tokio::test]
    async fn semantic_run_emits_expected_sequence() {
        let llm = ScriptedLlm::new();
        llm.push_chat_ok(
            r#"{"strategy":"semantic","extracted_tags":[],"rewritten_query":"a provider offering tax accounting services startups","rationale":"natural language"}"#,
        );
        let agent = SearchAgent::new(llm.client(), retriever());

        let events = collect(agent.run(
            "tax help for my startup".into(),
            None,
            5,
            0.0,
            CancelToken::new(),
        ))
        .await;

        assert_eq!(
            type_names(&events),
            vec![
                "strategy_start",
                "strategy_complete",
                "search_start",
                "search_progress",
                "complete"
            ]
        );
        let SearchEvent::Complete { data } = events.last().unwrap() else {
            panic!("expected complete");
        };
        assert_eq!(data.total_profiles_searched, 2);
        assert_eq!(data.candidate_profiles[0].profile_id, 1);
    }

    #[tokio::test]
    async fn unparseable_strategy_falls_back_to_semantic() {
        let llm = ScriptedLlm::new();
        // Both structured attempts return garbage.
        llm.push_chat_ok("not json").push_chat_ok("still not json");
        let agent = SearchAgent::new(llm.client(), retriever());

        let events = collect(agent.run(
            "tax accounting services".into(),
            None,
            5,
            0.0,
            CancelToken::new(),
        ))
        .await;

        let SearchEvent::StrategyComplete {
            strategy,
            rationale,
            rewritten_query,
            ..
        } = &events[1]
        else {
            panic!("expected strategy_complete");
        };
        assert_eq!(*strategy, SearchStrategy::Semantic);
        assert_eq!(rationale, "fallback");
        assert_eq!(rewritten_query, "tax accounting services");
        assert!(matches!(events.last().unwrap(), SearchEvent::Complete { .. }));
    }

    #[tokio::test]
    async fn tags_strategy_dispatches_tag_search() {
        let llm = ScriptedLlm::new();
        llm.push_chat_ok(
            r#"{"strategy":"tags","extracted_tags":["tax"],"rewritten_query":"tax services","rationale":"explicit category"}"#,
        );
        let agent = SearchAgent::new(llm.client(), retriever());

        let events = collect(agent.run("tax".into(), None, 5, 0.0, CancelToken::new())).await;
        let SearchEvent::Complete { data } = events.last().unwrap() else {
            panic!("expected complete");
        };
        assert!(data.search_strategy.starts_with("Tag-based search"));
        assert_eq!(data.candidate_profiles.len(), 1);
        assert_eq!(data.candidate_profiles[0].profile_id, 1);
    }

    #[tokio::test]
    async fn overload_terminates_with_error_event() {
        let llm = ScriptedLlm::new();
        // Overloaded on every backoff attempt.
        for _ in 0..3 {
            llm.push_chat_err(Error::Overloaded("529".into()));
        }
        let agent = SearchAgent::new(llm.client(), retriever());

        let events = collect(agent.run("q".into(), None, 5, 0.0, CancelToken::new())).await;
        let SearchEvent::Error { error, .. } = events.last().unwrap() else {
            panic!("expected error");
        };
        assert_eq!(error, "overloaded");
    }

    #[tokio::test]
    async fn cancelled_before_start_emits_nothing() {
        let llm = ScriptedLlm::new();
        let agent = SearchAgent::new(llm.client(), retriever());
        let cancel = CancelToken::new();
        cancel.cancel();

        let events = collect(agent.run("q".into(), None, 5, 0.0, cancel)).await;
        assert!(events.is_empty());
    }
}
