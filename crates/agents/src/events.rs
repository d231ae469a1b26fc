//! The streaming event envelope.
//!
//! Wire contract: every frame is a flat JSON object with a required `type`,
//! an `agent` field on forwarded agent events, and payload fields. Frames
//! are immutable once emitted.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use gb_domain::error::Error;
use gb_domain::model::{
    AdjudicatorOutput, SearchOutput, SearchStrategy, SummarizerOutput, SummaryStatistics,
    SummaryStyle,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-agent events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
    StrategyStart {
        message: String,
    },
    StrategyComplete {
        strategy: SearchStrategy,
        extracted_tags: Vec<String>,
        rewritten_query: String,
        rationale: String,
    },
    SearchStart {
        message: String,
        strategy: SearchStrategy,
    },
    SearchProgress {
        found_profiles: usize,
        total_searched: u64,
    },
    Complete {
        data: SearchOutput,
    },
    Error {
        error: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdjudicatorEvent {
    ProfileStart {
        index: usize,
        total: usize,
        profile_name: String,
    },
    /// Cumulative reasoning text for candidate `index`, coalesced.
    ProfileStreaming {
        index: usize,
        partial_text: String,
    },
    ProfileComplete {
        index: usize,
        profile_name: String,
        is_relevant: bool,
        relevance_score: f64,
        reasoning: String,
    },
    ProfileError {
        index: usize,
        profile_name: String,
        error: String,
    },
    Complete {
        data: AdjudicatorOutput,
    },
    Error {
        error: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SummarizerEvent {
    StatisticsComplete {
        statistics: SummaryStatistics,
    },
    PreparationStart {
        message: String,
    },
    ProfilePrepared {
        index: usize,
        total: usize,
        profile_name: String,
    },
    SummarizationStart {
        message: String,
        style: SummaryStyle,
    },
    Complete {
        data: SummarizerOutput,
        confidence: f64,
    },
    Error {
        error: String,
        message: String,
    },
}

/// An event from one of the pipeline agents.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Search(SearchEvent),
    Adjudicator(AdjudicatorEvent),
    Summarizer(SummarizerEvent),
}

impl AgentEvent {
    pub fn agent_name(&self) -> &'static str {
        match self {
            Self::Search(_) => "search",
            Self::Adjudicator(_) => "adjudicator",
            Self::Summarizer(_) => "summarizer",
        }
    }

    fn payload(&self) -> Value {
        match self {
            Self::Search(e) => serde_json::to_value(e).unwrap_or_default(),
            Self::Adjudicator(e) => serde_json::to_value(e).unwrap_or_default(),
            Self::Summarizer(e) => serde_json::to_value(e).unwrap_or_default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow-level events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run statistics carried by terminal workflow frames.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowStatistics {
    pub total_searched: u64,
    pub candidates_found: usize,
    pub relevant_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjudication_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarization_time: Option<f64>,
}

/// One frame of a workflow run. Exactly one terminal frame is emitted per
/// request: `Complete`, `NoResults`, `Error` or `Cancelled`.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Start {
        workflow_id: Uuid,
        query: String,
    },
    Agent(AgentEvent),
    Complete {
        summary: SummarizerOutput,
        statistics: WorkflowStatistics,
    },
    NoResults {
        message: String,
        statistics: WorkflowStatistics,
    },
    Error {
        error: String,
        message: String,
    },
    Cancelled,
}

impl WorkflowEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::NoResults { .. } | Self::Error { .. } | Self::Cancelled
        )
    }

    /// The flat wire object for this frame.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Start { workflow_id, query } => serde_json::json!({
                "type": "workflow_start",
                "workflow_id": workflow_id,
                "query": query,
                "message": "Starting intelligent search workflow...",
            }),
            Self::Agent(event) => {
                let mut wire = event.payload();
                if let Some(map) = wire.as_object_mut() {
                    map.insert("agent".into(), Value::String(event.agent_name().into()));
                }
                wire
            }
            Self::Complete { summary, statistics } => serde_json::json!({
                "type": "complete",
                "success": true,
                "summary": summary,
                "statistics": statistics,
            }),
            Self::NoResults { message, statistics } => serde_json::json!({
                "type": "complete",
                "no_results": true,
                "message": message,
                "statistics": statistics,
            }),
            Self::Error { error, message } => serde_json::json!({
                "type": "error",
                "error": error,
                "message": message,
            }),
            Self::Cancelled => serde_json::json!({ "type": "cancelled" }),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn-level events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One frame of a full orchestrated turn.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// The orchestrator's routing summary, emitted before a search run.
    Analysis { summary: String },
    Workflow(WorkflowEvent),
    /// The conversational responder's single substantive frame.
    Final { content: String },
    Error { error: String, message: String },
    Cancelled,
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Final { .. } | Self::Error { .. } | Self::Cancelled => true,
            Self::Workflow(w) => w.is_terminal(),
            Self::Analysis { .. } => false,
        }
    }

    pub fn to_wire(&self) -> Value {
        match self {
            Self::Analysis { summary } => serde_json::json!({
                "type": "analysis",
                "summary": summary,
            }),
            Self::Workflow(event) => event.to_wire(),
            Self::Final { content } => serde_json::json!({
                "type": "final",
                "content": content,
            }),
            Self::Error { error, message } => serde_json::json!({
                "type": "error",
                "error": error,
                "message": message,
            }),
            Self::Cancelled => serde_json::json!({ "type": "cancelled" }),
        }
    }
}

/// `(kind, user_message)` pair for error frames.
pub fn error_fields(e: &Error) -> (String, String) {
    let kind = match e {
        Error::Overloaded(_) => "overloaded",
        Error::Cancelled => "cancelled",
        Error::Timeout(_) => "timeout",
        Error::Parse(_) => "parse_error",
        Error::NotFound(_) => "not_found",
        Error::Forbidden(_) => "forbidden",
        Error::SessionClosed(_) => "session_closed",
        Error::Db(_) => "storage",
        _ => "internal",
    };
    (kind.to_owned(), e.user_message())
}
