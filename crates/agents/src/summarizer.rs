//! Stage 3: the summarizer.
//!
//! Computes deterministic statistics from the surviving profiles, then asks
//! the LLM for the final artifact. A malformed reply degrades to a basic
//! deterministic summary rather than failing the run.

use serde::Deserialize;
use tokio::sync::mpsc;

use gb_domain::cancel::CancelToken;
use gb_domain::error::Error;
use gb_domain::model::{ProfileMatch, SummarizerOutput, SummaryStatistics, SummaryStyle};
use gb_llm::LlmClient;

use crate::events::{error_fields, SummarizerEvent};
use crate::profile_text::{extract_field, extract_profile_name};
use crate::prompts;
use crate::CHANNEL_CAPACITY;

/// What the model fills in; statistics are always computed in code.
#[derive(Debug, Deserialize)]
struct LlmSummary {
    executive_summary: String,
    #[serde(default)]
    provider_recommendations: Vec<String>,
    #[serde(default)]
    key_insights: Vec<String>,
}

#[derive(Clone)]
pub struct SummarizerAgent {
    llm: LlmClient,
}

impl SummarizerAgent {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub fn run(
        &self,
        query: String,
        context: Option<String>,
        relevant_profiles: Vec<ProfileMatch>,
        style: SummaryStyle,
        cancel: CancelToken,
    ) -> mpsc::Receiver<SummarizerEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let agent = self.clone();
        tokio::spawn(async move {
            agent
                .run_inner(query, context, relevant_profiles, style, tx, cancel)
                .await;
        });
        rx
    }

    async fn run_inner(
        &self,
        query: String,
        context: Option<String>,
        profiles: Vec<ProfileMatch>,
        style: SummaryStyle,
        tx: mpsc::Sender<SummarizerEvent>,
        cancel: CancelToken,
    ) {
        if cancel.is_cancelled() {
            return;
        }

        let statistics = extract_statistics(&profiles);
        let _ = tx
            .send(SummarizerEvent::StatisticsComplete {
                statistics: statistics.clone(),
            })
            .await;

        let _ = tx
            .send(SummarizerEvent::PreparationStart {
                message: "Preparing profile data for summarization...".into(),
            })
            .await;

        let total = profiles.len();
        let mut profiles_text = String::new();
        for (index, profile) in profiles.iter().enumerate() {
            profiles_text.push_str(&format!(
                "\n\n---\n\nProfile {} (Similarity Score: {:.2}):\n{}",
                index + 1,
                profile.similarity_score,
                profile.profile_text
            ));
            let _ = tx
                .send(SummarizerEvent::ProfilePrepared {
                    index,
                    total,
                    profile_name: extract_profile_name(&profile.profile_text),
                })
                .await;
        }

        let _ = tx
            .send(SummarizerEvent::SummarizationStart {
                message: format!("Generating {} summary...", style.as_str()),
                style,
            })
            .await;

        let output = match self
            .llm
            .complete_json::<LlmSummary>(
                prompts::summary_request(&query, style, &profiles_text, context.as_deref()),
                &cancel,
            )
            .await
        {
            Ok(summary) => SummarizerOutput {
                executive_summary: summary.executive_summary,
                provider_recommendations: summary.provider_recommendations,
                key_insights: summary.key_insights,
                summary_statistics: statistics,
            },
            Err(Error::Cancelled) => return,
            Err(Error::Parse(e)) => {
                tracing::warn!(error = %e, "summary output unparseable, using basic summary");
                basic_summary(&profiles, statistics)
            }
            Err(e) => {
                tracing::warn!(error = %e, "summary call failed");
                let (kind, message) = error_fields(&e);
                let _ = tx.send(SummarizerEvent::Error { error: kind, message }).await;
                return;
            }
        };

        let confidence = confidence_for(profiles.len());
        let _ = tx
            .send(SummarizerEvent::Complete {
                data: output,
                confidence,
            })
            .await;
    }
}

/// Count providers by the "Country:" and "Provider Type:" lines.
fn extract_statistics(profiles: &[ProfileMatch]) -> SummaryStatistics {
    let mut statistics = SummaryStatistics {
        total_providers: profiles.len(),
        ..Default::default()
    };
    for profile in profiles {
        if let Some(country) = extract_field(&profile.profile_text, "Country:") {
            *statistics.countries.entry(country.to_owned()).or_default() += 1;
        }
        if let Some(kind) = extract_field(&profile.profile_text, "Provider Type:") {
            *statistics.provider_types.entry(kind.to_owned()).or_default() += 1;
        }
    }
    statistics
}

/// `min(0.9, 0.6 + 0.1 × relevant_count)`.
fn confidence_for(relevant_count: usize) -> f64 {
    (0.6 + 0.1 * relevant_count as f64).min(0.9)
}

/// The deterministic fallback artifact when the model's summary cannot be
/// parsed.
fn basic_summary(profiles: &[ProfileMatch], statistics: SummaryStatistics) -> SummarizerOutput {
    let recommendations: Vec<String> = profiles
        .iter()
        .map(|p| {
            let name = extract_profile_name(&p.profile_text);
            let country = extract_field(&p.profile_text, "Country:").unwrap_or("Unknown");
            format!("{name} ({country})")
        })
        .collect();

    let key_insights = vec![
        "All listed providers passed relevance screening for your query".to_owned(),
        format!(
            "{} provider(s) matched across {} country(ies)",
            profiles.len(),
            statistics.countries.len().max(1)
        ),
        "Refine your query for more targeted recommendations".to_owned(),
    ];

    SummarizerOutput {
        executive_summary: format!(
            "Found {} relevant service provider(s) for your query.",
            profiles.len()
        ),
        provider_recommendations: recommendations,
        key_insights,
        summary_statistics: statistics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;

    fn profile(id: i64, name: &str, country: &str, kind: &str) -> ProfileMatch {
        ProfileMatch {
            profile_id: id,
            similarity_score: 0.8,
            profile_text: format!(
                "Company Name: {name}\nCountry: {country}\nProvider Type: {kind}"
            ),
        }
    }

    async fn collect(mut rx: mpsc::Receiver<SummarizerEvent>) -> Vec<SummarizerEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[test]
    fn statistics_count_by_country_and_type() {
        let stats = extract_statistics(&[
            profile(1, "A", "UAE", "Accounting Firm"),
            profile(2, "B", "UAE", "Law Firm"),
            profile(3, "C", "USA", "Accounting Firm"),
        ]);
        assert_eq!(stats.total_providers, 3);
        assert_eq!(stats.countries["UAE"], 2);
        assert_eq!(stats.countries["USA"], 1);
        assert_eq!(stats.provider_types["Accounting Firm"], 2);
    }

    #[test]
    fn confidence_formula() {
        assert!((confidence_for(0) - 0.6).abs() < 1e-9);
        assert!((confidence_for(2) - 0.8).abs() < 1e-9);
        assert!((confidence_for(3) - 0.9).abs() < 1e-9);
        // Capped.
        assert!((confidence_for(10) - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn event_sequence_and_structured_output() {
        let llm = ScriptedLlm::new();
        llm.push_chat_ok(
            r#"{"executive_summary": "Two strong options.", "provider_recommendations": ["**[Alpha](https://g/1)** - best fit", "Beta - runner up"], "key_insights": ["Both are local"], "summary_statistics": {}}"#,
        );
        let agent = SummarizerAgent::new(llm.client());

        let events = collect(agent.run(
            "tax help".into(),
            None,
            vec![
                profile(1, "Alpha", "UAE", "Accounting Firm"),
                profile(2, "Beta", "UAE", "Accounting Firm"),
            ],
            SummaryStyle::Comprehensive,
            CancelToken::new(),
        ))
        .await;

        let names: Vec<&'static str> = events
            .iter()
            .map(|e| match e {
                SummarizerEvent::StatisticsComplete { .. } => "statistics_complete",
                SummarizerEvent::PreparationStart { .. } => "preparation_start",
                SummarizerEvent::ProfilePrepared { .. } => "profile_prepared",
                SummarizerEvent::SummarizationStart { .. } => "summarization_start",
                SummarizerEvent::Complete { .. } => "complete",
                SummarizerEvent::Error { .. } => "error",
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "statistics_complete",
                "preparation_start",
                "profile_prepared",
                "profile_prepared",
                "summarization_start",
                "complete"
            ]
        );

        let SummarizerEvent::Complete { data, confidence } = events.last().unwrap() else {
            panic!("expected complete");
        };
        assert_eq!(data.executive_summary, "Two strong options.");
        assert_eq!(data.provider_recommendations.len(), 2);
        // Statistics come from code, not the model.
        assert_eq!(data.summary_statistics.total_providers, 2);
        assert!((confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn parse_failure_degrades_to_basic_summary() {
        let llm = ScriptedLlm::new();
        llm.push_chat_ok("no json here").push_chat_ok("nor here");
        let agent = SummarizerAgent::new(llm.client());

        let events = collect(agent.run(
            "q".into(),
            None,
            vec![profile(1, "Alpha", "UAE", "Accounting Firm")],
            SummaryStyle::Brief,
            CancelToken::new(),
        ))
        .await;

        let SummarizerEvent::Complete { data, .. } = events.last().unwrap() else {
            panic!("expected complete");
        };
        assert_eq!(data.provider_recommendations, vec!["Alpha (UAE)"]);
        assert_eq!(data.key_insights.len(), 3);
        assert!(data.executive_summary.contains("1 relevant"));
    }

    #[tokio::test]
    async fn overload_surfaces_error_event() {
        let llm = ScriptedLlm::new();
        for _ in 0..3 {
            llm.push_chat_err(Error::Overloaded("529".into()));
        }
        let agent = SummarizerAgent::new(llm.client());

        let events = collect(agent.run(
            "q".into(),
            None,
            vec![profile(1, "Alpha", "UAE", "Accounting Firm")],
            SummaryStyle::Comprehensive,
            CancelToken::new(),
        ))
        .await;

        let SummarizerEvent::Error { error, .. } = events.last().unwrap() else {
            panic!("expected error");
        };
        assert_eq!(error, "overloaded");
    }
}
