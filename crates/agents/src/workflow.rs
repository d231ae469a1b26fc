//! The workflow coordinator: Search → Adjudicator → Summarizer.
//!
//! State machine per request:
//!
//! ```text
//! init → searching → adjudicating → (no_results | summarizing) → done
//! any state → error (terminal) on fatal stage failure
//! any state → cancelled (terminal) on cancellation
//! ```
//!
//! Empty stages short-circuit to the deterministic no-results terminal;
//! exactly one terminal frame is emitted per run and nothing ever
//! propagates past the event stream.

use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;

use gb_domain::cancel::CancelToken;
use gb_domain::model::{
    AdjudicatorOutput, SearchOutput, StageLogEntry, SummarizerOutput, SummaryStyle, WorkflowState,
};
use gb_llm::LlmClient;
use gb_retriever::Retriever;

use crate::adjudicator::AdjudicatorAgent;
use crate::events::{AdjudicatorEvent, AgentEvent, SearchEvent, SummarizerEvent, WorkflowEvent};
use crate::search::SearchAgent;
use crate::summarizer::SummarizerAgent;
use crate::CHANNEL_CAPACITY;

/// Pinned no-results phrasings (golden-tested).
pub const NO_CANDIDATES_MESSAGE: &str = "No candidate profiles found";
pub const NO_RELEVANT_MESSAGE: &str = "No relevant profiles found after evaluation";

pub use crate::events::WorkflowStatistics;

#[derive(Clone)]
pub struct Workflow {
    search: SearchAgent,
    adjudicator: AdjudicatorAgent,
    summarizer: SummarizerAgent,
    relevance_threshold: f64,
    min_similarity: f64,
}

impl Workflow {
    pub fn new(
        llm: LlmClient,
        retriever: Retriever,
        relevance_threshold: f64,
        min_similarity: f64,
    ) -> Self {
        Self {
            search: SearchAgent::new(llm.clone(), retriever),
            adjudicator: AdjudicatorAgent::new(llm.clone()),
            summarizer: SummarizerAgent::new(llm),
            relevance_threshold,
            min_similarity,
        }
    }

    /// Run the full pipeline for one query.
    pub fn run(
        &self,
        query: String,
        context: Option<String>,
        max_results: usize,
        cancel: CancelToken,
    ) -> mpsc::Receiver<WorkflowEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let workflow = self.clone();
        tokio::spawn(async move {
            workflow.run_inner(query, context, max_results, tx, cancel).await;
        });
        rx
    }

    async fn run_inner(
        &self,
        query: String,
        context: Option<String>,
        max_results: usize,
        tx: mpsc::Sender<WorkflowEvent>,
        cancel: CancelToken,
    ) {
        let mut state = WorkflowState::new(&query, max_results);
        let _ = tx
            .send(WorkflowEvent::Start {
                workflow_id: state.workflow_id,
                query: query.clone(),
            })
            .await;

        // ── Search ────────────────────────────────────────────────
        let search_started = Instant::now();
        let stage = open_stage(&mut state, "search");

        let mut search_rx = self.search.run(
            query.clone(),
            context.clone(),
            max_results,
            self.min_similarity,
            cancel.clone(),
        );
        let mut search_output: Option<SearchOutput> = None;
        let mut stage_error: Option<(String, String)> = None;
        while let Some(event) = search_rx.recv().await {
            match &event {
                SearchEvent::Complete { data } => search_output = Some(data.clone()),
                SearchEvent::Error { error, message } => {
                    stage_error = Some((error.clone(), message.clone()))
                }
                _ => {}
            }
            if tx
                .send(WorkflowEvent::Agent(AgentEvent::Search(event)))
                .await
                .is_err()
            {
                return;
            }
        }
        let search_time = search_started.elapsed().as_secs_f64();
        close_stage(&mut state, stage, stage_error.is_none(), "search finished");

        if cancel.is_cancelled() {
            let _ = tx.send(WorkflowEvent::Cancelled).await;
            return;
        }
        if let Some((error, message)) = stage_error {
            state.errors.push(format!("search: {message}"));
            self.finish(&mut state);
            let _ = tx.send(WorkflowEvent::Error { error, message }).await;
            return;
        }
        let Some(search_output) = search_output else {
            let _ = tx
                .send(WorkflowEvent::Error {
                    error: "internal".into(),
                    message: "search produced no result".into(),
                })
                .await;
            return;
        };

        let total_searched = search_output.total_profiles_searched;
        let candidates = search_output.candidate_profiles.clone();
        state.search_output = Some(search_output);

        if candidates.is_empty() {
            self.finish(&mut state);
            let _ = tx
                .send(WorkflowEvent::NoResults {
                    message: NO_CANDIDATES_MESSAGE.into(),
                    statistics: WorkflowStatistics {
                        total_searched,
                        candidates_found: 0,
                        relevant_found: 0,
                        search_time: Some(search_time),
                        ..Default::default()
                    },
                })
                .await;
            return;
        }

        // ── Adjudicate ────────────────────────────────────────────
        let adjudication_started = Instant::now();
        let stage = open_stage(&mut state, "adjudicator");

        let mut adj_rx = self.adjudicator.run(
            query.clone(),
            context.clone(),
            candidates.clone(),
            self.relevance_threshold,
            cancel.clone(),
        );
        let mut adjudicator_output: Option<AdjudicatorOutput> = None;
        let mut stage_error: Option<(String, String)> = None;
        while let Some(event) = adj_rx.recv().await {
            match &event {
                AdjudicatorEvent::Complete { data } => adjudicator_output = Some(data.clone()),
                AdjudicatorEvent::Error { error, message } => {
                    stage_error = Some((error.clone(), message.clone()))
                }
                _ => {}
            }
            if tx
                .send(WorkflowEvent::Agent(AgentEvent::Adjudicator(event)))
                .await
                .is_err()
            {
                return;
            }
        }
        let adjudication_time = adjudication_started.elapsed().as_secs_f64();
        close_stage(&mut state, stage, stage_error.is_none(), "adjudication finished");

        if cancel.is_cancelled() {
            let _ = tx.send(WorkflowEvent::Cancelled).await;
            return;
        }
        if let Some((error, message)) = stage_error {
            state.errors.push(format!("adjudicator: {message}"));
            self.finish(&mut state);
            let _ = tx.send(WorkflowEvent::Error { error, message }).await;
            return;
        }
        let Some(adjudicator_output) = adjudicator_output else {
            let _ = tx
                .send(WorkflowEvent::Error {
                    error: "internal".into(),
                    message: "adjudication produced no result".into(),
                })
                .await;
            return;
        };

        let relevant = adjudicator_output.relevant_profiles.clone();
        state.adjudicator_output = Some(adjudicator_output);

        if relevant.is_empty() {
            self.finish(&mut state);
            let _ = tx
                .send(WorkflowEvent::NoResults {
                    message: NO_RELEVANT_MESSAGE.into(),
                    statistics: WorkflowStatistics {
                        total_searched,
                        candidates_found: candidates.len(),
                        relevant_found: 0,
                        search_time: Some(search_time),
                        adjudication_time: Some(adjudication_time),
                        ..Default::default()
                    },
                })
                .await;
            return;
        }

        // ── Summarize ─────────────────────────────────────────────
        let summarization_started = Instant::now();
        let stage = open_stage(&mut state, "summarizer");

        let mut sum_rx = self.summarizer.run(
            query.clone(),
            context,
            relevant.clone(),
            SummaryStyle::Comprehensive,
            cancel.clone(),
        );
        let mut summary: Option<SummarizerOutput> = None;
        let mut stage_error: Option<(String, String)> = None;
        while let Some(event) = sum_rx.recv().await {
            match &event {
                SummarizerEvent::Complete { data, .. } => summary = Some(data.clone()),
                SummarizerEvent::Error { error, message } => {
                    stage_error = Some((error.clone(), message.clone()))
                }
                _ => {}
            }
            if tx
                .send(WorkflowEvent::Agent(AgentEvent::Summarizer(event)))
                .await
                .is_err()
            {
                return;
            }
        }
        let summarization_time = summarization_started.elapsed().as_secs_f64();
        close_stage(&mut state, stage, stage_error.is_none(), "summarization finished");

        if cancel.is_cancelled() {
            let _ = tx.send(WorkflowEvent::Cancelled).await;
            return;
        }
        if let Some((error, message)) = stage_error {
            state.errors.push(format!("summarizer: {message}"));
            self.finish(&mut state);
            let _ = tx.send(WorkflowEvent::Error { error, message }).await;
            return;
        }
        let Some(summary) = summary else {
            let _ = tx
                .send(WorkflowEvent::Error {
                    error: "internal".into(),
                    message: "summarization produced no result".into(),
                })
                .await;
            return;
        };

        state.summary = Some(summary.clone());
        self.finish(&mut state);

        let _ = tx
            .send(WorkflowEvent::Complete {
                summary,
                statistics: WorkflowStatistics {
                    total_searched,
                    candidates_found: candidates.len(),
                    relevant_found: relevant.len(),
                    search_time: Some(search_time),
                    adjudication_time: Some(adjudication_time),
                    summarization_time: Some(summarization_time),
                },
            })
            .await;
    }

    fn finish(&self, state: &mut WorkflowState) {
        state.ended_at = Some(Utc::now());
        tracing::debug!(
            workflow_id = %state.workflow_id,
            stages = state.stage_log.len(),
            errors = state.errors.len(),
            "workflow finished"
        );
    }
}

fn open_stage(state: &mut WorkflowState, agent: &str) -> usize {
    state.stage_log.push(StageLogEntry {
        agent: agent.to_owned(),
        started_at: Utc::now(),
        ended_at: None,
        ok: false,
        message: String::new(),
    });
    state.stage_log.len() - 1
}

fn close_stage(state: &mut WorkflowState, index: usize, ok: bool, message: &str) {
    if let Some(entry) = state.stage_log.get_mut(index) {
        entry.ended_at = Some(Utc::now());
        entry.ok = ok;
        entry.message = message.to_owned();
    }
}
