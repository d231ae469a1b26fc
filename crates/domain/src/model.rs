//! Core data model for the discovery pipeline.
//!
//! These types travel between the retriever, the three pipeline agents and
//! the workflow coordinator. They double as the shapes the LLM is asked to
//! produce in structured mode, so everything the model fills in derives
//! `Deserialize`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Profiles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A service provider profile matched by the retriever.
///
/// `profile_text` is the fully materialized textual representation of the
/// profile; nothing downstream goes back to the database for more detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileMatch {
    pub profile_id: i64,
    /// Normalized similarity in [0, 1]. For semantic hits this is
    /// `1 - cosine_distance` clamped; for tag hits the matched fraction.
    pub similarity_score: f64,
    pub profile_text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search strategy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Semantic,
    Tags,
    Hybrid,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Tags => "tags",
            Self::Hybrid => "hybrid",
        }
    }
}

/// The search agent's strategy decision, produced by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub strategy: SearchStrategy,
    #[serde(default)]
    pub extracted_tags: Vec<String>,
    /// The query to run against the semantic index, rephrased as a
    /// provider self-description.
    pub rewritten_query: String,
    #[serde(default)]
    pub rationale: String,
}

impl StrategyDecision {
    /// The deterministic fallback when the strategy call fails to parse:
    /// semantic search with the user's original wording.
    pub fn fallback(query: &str) -> Self {
        Self {
            strategy: SearchStrategy::Semantic,
            extracted_tags: Vec::new(),
            rewritten_query: query.to_owned(),
            rationale: "fallback".into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Output of the search stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutput {
    pub candidate_profiles: Vec<ProfileMatch>,
    pub total_profiles_searched: u64,
    pub search_time_seconds: f64,
    pub search_strategy: String,
}

/// Per-candidate relevance verdict from the adjudicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjudicationResult {
    pub profile: ProfileMatch,
    pub relevance_score: f64,
    pub is_relevant: bool,
    pub reasoning: String,
    pub confidence: f64,
}

impl AdjudicationResult {
    /// Build a verdict, binding `is_relevant` to the threshold. The flag is
    /// never taken from the model's own claim.
    pub fn from_score(
        profile: ProfileMatch,
        relevance_score: f64,
        reasoning: String,
        confidence: f64,
        threshold: f64,
    ) -> Self {
        let relevance_score = relevance_score.clamp(0.0, 1.0);
        Self {
            profile,
            is_relevant: relevance_score >= threshold,
            relevance_score,
            reasoning,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// The verdict recorded when evaluation of a candidate fails.
    pub fn failed(profile: ProfileMatch, error: &str) -> Self {
        Self {
            profile,
            relevance_score: 0.0,
            is_relevant: false,
            reasoning: format!("Failed to evaluate: {error}"),
            confidence: 0.0,
        }
    }
}

/// Output of the adjudication stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjudicatorOutput {
    /// Every candidate that was evaluated, relevant or not, in input order.
    pub adjudicated_profiles: Vec<AdjudicationResult>,
    /// The subset that passed the relevance threshold.
    pub relevant_profiles: Vec<ProfileMatch>,
    pub rejection_summary: String,
    /// Arithmetic mean of per-candidate confidence.
    pub adjudication_confidence: f64,
}

/// Result statistics surfaced in summaries and terminal events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub total_providers: usize,
    #[serde(default)]
    pub countries: BTreeMap<String, usize>,
    #[serde(default)]
    pub provider_types: BTreeMap<String, usize>,
}

/// Output of the summarization stage: the final user-facing artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerOutput {
    pub executive_summary: String,
    /// Ordered recommendations; rendered as bold Markdown deep-links when a
    /// Growbal link is known for the provider.
    pub provider_recommendations: Vec<String>,
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub summary_statistics: SummaryStatistics,
}

/// Controls the prose depth of the summary, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    Brief,
    Comprehensive,
    Detailed,
}

impl SummaryStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Comprehensive => "comprehensive",
            Self::Detailed => "detailed",
        }
    }
}

impl Default for SummaryStyle {
    fn default() -> Self {
        Self::Comprehensive
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutedTool {
    Search,
    Conversational,
}

/// The orchestrator's per-turn routing decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorDecision {
    pub tool_needed: bool,
    pub tool: Option<RoutedTool>,
    pub summary: String,
    #[serde(default)]
    pub direct_response: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One line of the per-request stage log.
#[derive(Debug, Clone, Serialize)]
pub struct StageLogEntry {
    pub agent: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ok: bool,
    pub message: String,
}

/// Per-request pipeline state. Only the workflow coordinator mutates this;
/// each stage writes its own slot exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub workflow_id: Uuid,
    pub original_query: String,
    pub max_results: usize,
    pub search_output: Option<SearchOutput>,
    pub adjudicator_output: Option<AdjudicatorOutput>,
    pub summary: Option<SummarizerOutput>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    pub stage_log: Vec<StageLogEntry>,
}

impl WorkflowState {
    pub fn new(query: &str, max_results: usize) -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            original_query: query.to_owned(),
            max_results,
            search_output: None,
            adjudicator_output: None,
            summary: None,
            started_at: Utc::now(),
            ended_at: None,
            errors: Vec::new(),
            stage_log: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: i64) -> ProfileMatch {
        ProfileMatch {
            profile_id: id,
            similarity_score: 0.8,
            profile_text: "Company Name: Test Co".into(),
        }
    }

    #[test]
    fn verdict_binds_relevance_to_threshold() {
        let hit = AdjudicationResult::from_score(profile(1), 0.7, "ok".into(), 0.9, 0.7);
        assert!(hit.is_relevant);

        let miss = AdjudicationResult::from_score(profile(2), 0.69, "no".into(), 0.9, 0.7);
        assert!(!miss.is_relevant);
    }

    #[test]
    fn verdict_clamps_scores() {
        let v = AdjudicationResult::from_score(profile(1), 1.7, "".into(), -0.2, 0.7);
        assert_eq!(v.relevance_score, 1.0);
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn failed_verdict_shape() {
        let v = AdjudicationResult::failed(profile(1), "timeout");
        assert!(!v.is_relevant);
        assert_eq!(v.relevance_score, 0.0);
        assert_eq!(v.reasoning, "Failed to evaluate: timeout");
    }

    #[test]
    fn strategy_decision_parses_from_llm_json() {
        let raw = r#"{
            "strategy": "hybrid",
            "extracted_tags": ["tax", "accounting"],
            "rewritten_query": "a provider offering tax and accounting services",
            "rationale": "tags plus semantic context"
        }"#;
        let decision: StrategyDecision = serde_json::from_str(raw).unwrap();
        assert_eq!(decision.strategy, SearchStrategy::Hybrid);
        assert_eq!(decision.extracted_tags.len(), 2);
    }

    #[test]
    fn fallback_strategy_is_semantic() {
        let d = StrategyDecision::fallback("find me a tax firm");
        assert_eq!(d.strategy, SearchStrategy::Semantic);
        assert_eq!(d.rewritten_query, "find me a tax firm");
        assert_eq!(d.rationale, "fallback");
    }
}
