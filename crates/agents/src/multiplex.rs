//! The stream multiplexer: turns the turn event stream into display
//! frames.
//!
//! `Status` frames are transient progress lines; `Final` frames are
//! substantive content appended to the conversation. The last final
//! frame's text is what gets persisted as the assistant's turn.

use gb_domain::model::SummarizerOutput;

use crate::events::{
    AdjudicatorEvent, AgentEvent, SearchEvent, SummarizerEvent, TurnEvent, WorkflowEvent,
    WorkflowStatistics,
};

/// Keywords that mark a rendered line as transient progress.
const STATUS_KEYWORDS: [&str; 8] = [
    "searching",
    "analyzing",
    "processing",
    "strategy",
    "progress",
    "found profiles",
    "complete",
    "step",
];

/// Prose shorter than this is never promoted to a final frame on its own.
const MIN_FINAL_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Status,
    Final,
}

/// One display frame: classification, rendered text, and the wire object.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub text: String,
    pub wire: serde_json::Value,
}

/// Stateful classifier over one turn's event stream.
#[derive(Debug, Default)]
pub struct Multiplexer {
    last_final: Option<String>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&mut self, event: &TurnEvent) -> Frame {
        let text = render_text(event);
        let kind = classify(event, &text);
        if kind == FrameKind::Final {
            self.last_final = Some(text.clone());
        }
        Frame {
            kind,
            text,
            wire: event.to_wire(),
        }
    }

    /// The content to persist as the assistant's turn.
    pub fn last_final(&self) -> Option<&str> {
        self.last_final.as_deref()
    }
}

fn classify(event: &TurnEvent, text: &str) -> FrameKind {
    match event {
        TurnEvent::Final { .. } => FrameKind::Final,
        TurnEvent::Workflow(WorkflowEvent::Complete { .. })
        | TurnEvent::Workflow(WorkflowEvent::NoResults { .. }) => FrameKind::Final,
        // The routing preamble is displayed but never promoted.
        TurnEvent::Analysis { .. } => FrameKind::Status,
        _ => {
            let lowered = text.to_lowercase();
            let is_status = STATUS_KEYWORDS.iter().any(|k| lowered.contains(k));
            if text.chars().count() >= MIN_FINAL_CHARS && !is_status {
                FrameKind::Final
            } else {
                FrameKind::Status
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn render_text(event: &TurnEvent) -> String {
    match event {
        TurnEvent::Analysis { summary } => summary.clone(),
        TurnEvent::Final { content } => content.clone(),
        TurnEvent::Error { message, .. } => message.clone(),
        TurnEvent::Cancelled => "Cancelled".into(),
        TurnEvent::Workflow(w) => render_workflow(w),
    }
}

fn render_workflow(event: &WorkflowEvent) -> String {
    match event {
        WorkflowEvent::Start { .. } => "Starting intelligent search workflow...".into(),
        WorkflowEvent::Agent(agent) => render_agent(agent),
        WorkflowEvent::Complete { summary, .. } => render_summary(summary),
        WorkflowEvent::NoResults { message, statistics } => render_no_results(message, statistics),
        WorkflowEvent::Error { message, .. } => message.clone(),
        WorkflowEvent::Cancelled => "Cancelled".into(),
    }
}

fn render_agent(event: &AgentEvent) -> String {
    match event {
        AgentEvent::Search(e) => match e {
            SearchEvent::StrategyStart { message } => message.clone(),
            SearchEvent::StrategyComplete { strategy, rationale, .. } => {
                format!("Strategy selected: {} ({rationale})", strategy.as_str())
            }
            SearchEvent::SearchStart { message, .. } => message.clone(),
            SearchEvent::SearchProgress { found_profiles, total_searched } => {
                format!("Found profiles: {found_profiles} (searched {total_searched})")
            }
            SearchEvent::Complete { data } => format!(
                "Search complete: {} candidate(s)",
                data.candidate_profiles.len()
            ),
            SearchEvent::Error { message, .. } => message.clone(),
        },
        AgentEvent::Adjudicator(e) => match e {
            AdjudicatorEvent::ProfileStart { index, total, profile_name } => {
                format!("Evaluating profile {} of {total}: {profile_name}", index + 1)
            }
            AdjudicatorEvent::ProfileStreaming { partial_text, .. } => {
                format!("Analyzing: {partial_text}")
            }
            AdjudicatorEvent::ProfileComplete {
                profile_name,
                is_relevant,
                relevance_score,
                ..
            } => {
                let verdict = if *is_relevant { "relevant" } else { "not relevant" };
                format!("{profile_name}: {verdict} (score {relevance_score:.2})")
            }
            AdjudicatorEvent::ProfileError { profile_name, .. } => {
                format!("{profile_name}: evaluation failed")
            }
            AdjudicatorEvent::Complete { data } => format!(
                "Adjudication complete: {} of {} relevant",
                data.relevant_profiles.len(),
                data.adjudicated_profiles.len()
            ),
            AdjudicatorEvent::Error { message, .. } => message.clone(),
        },
        AgentEvent::Summarizer(e) => match e {
            SummarizerEvent::StatisticsComplete { statistics } => {
                format!("Statistics complete: {} provider(s)", statistics.total_providers)
            }
            SummarizerEvent::PreparationStart { message } => message.clone(),
            SummarizerEvent::ProfilePrepared { index, total, profile_name } => {
                format!("Prepared profile {} of {total}: {profile_name}", index + 1)
            }
            SummarizerEvent::SummarizationStart { message, .. } => message.clone(),
            SummarizerEvent::Complete { .. } => "Summary generation complete".into(),
            SummarizerEvent::Error { message, .. } => message.clone(),
        },
    }
}

/// The final user-facing markdown for a successful run.
pub fn render_summary(summary: &SummarizerOutput) -> String {
    let mut out = summary.executive_summary.clone();

    if !summary.provider_recommendations.is_empty() {
        out.push_str("\n\n**Recommendations:**\n");
        for (i, rec) in summary.provider_recommendations.iter().enumerate() {
            out.push_str(&format!("{}. {rec}\n", i + 1));
        }
    }
    if !summary.key_insights.is_empty() {
        out.push_str("\n**Key Insights:**\n");
        for insight in &summary.key_insights {
            out.push_str(&format!("- {insight}\n"));
        }
    }
    out.trim_end().to_owned()
}

/// The deterministic no-results rendering (golden-tested).
pub fn render_no_results(message: &str, statistics: &WorkflowStatistics) -> String {
    format!(
        "No relevant service providers found\n\n{message}.\nSearched {} profiles; {} candidate(s) evaluated.",
        statistics.total_searched, statistics.candidates_found
    )
}
