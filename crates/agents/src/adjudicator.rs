//! Stage 2: the adjudicator.
//!
//! Candidates are evaluated strictly sequentially so per-candidate event
//! groups never interleave: `profile_start`, cumulative
//! `profile_streaming` fragments, then exactly one of `profile_complete`
//! or `profile_error` per candidate, in index order.

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use gb_domain::cancel::CancelToken;
use gb_domain::error::{Error, Result};
use gb_domain::model::{AdjudicationResult, AdjudicatorOutput, ProfileMatch};
use gb_domain::stream::StreamEvent;
use gb_llm::client::parse_structured;
use gb_llm::LlmClient;

use crate::events::AdjudicatorEvent;
use crate::profile_text::extract_profile_name;
use crate::prompts;
use crate::CHANNEL_CAPACITY;

/// Emit a cumulative `profile_streaming` frame once at least this many new
/// characters have arrived. Loose coalescing, not a cadence contract.
const STREAM_COALESCE_CHARS: usize = 48;

/// The shape the model is asked to produce per candidate. `is_relevant` is
/// parsed but never trusted; the threshold binding happens in code.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    relevance_score: f64,
    reasoning: String,
    #[serde(default, alias = "confidence")]
    confidence_level: f64,
}

#[derive(Clone)]
pub struct AdjudicatorAgent {
    llm: LlmClient,
}

impl AdjudicatorAgent {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Evaluate all candidates against `query`. Cancellation takes effect
    /// at the next candidate boundary.
    pub fn run(
        &self,
        query: String,
        context: Option<String>,
        candidates: Vec<ProfileMatch>,
        threshold: f64,
        cancel: CancelToken,
    ) -> mpsc::Receiver<AdjudicatorEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let agent = self.clone();
        tokio::spawn(async move {
            agent
                .run_inner(query, context, candidates, threshold, tx, cancel)
                .await;
        });
        rx
    }

    async fn run_inner(
        &self,
        query: String,
        context: Option<String>,
        candidates: Vec<ProfileMatch>,
        threshold: f64,
        tx: mpsc::Sender<AdjudicatorEvent>,
        cancel: CancelToken,
    ) {
        let total = candidates.len();
        let mut adjudicated: Vec<AdjudicationResult> = Vec::with_capacity(total);
        let mut relevant: Vec<ProfileMatch> = Vec::new();

        for (index, profile) in candidates.into_iter().enumerate() {
            // Candidate boundary: the cancellation point.
            if cancel.is_cancelled() {
                return;
            }

            let profile_name = extract_profile_name(&profile.profile_text);
            let _ = tx
                .send(AdjudicatorEvent::ProfileStart {
                    index,
                    total,
                    profile_name: profile_name.clone(),
                })
                .await;

            match self
                .evaluate(&query, context.as_deref(), &profile, threshold, index, &tx, &cancel)
                .await
            {
                Ok(verdict) => {
                    let _ = tx
                        .send(AdjudicatorEvent::ProfileComplete {
                            index,
                            profile_name,
                            is_relevant: verdict.is_relevant,
                            relevance_score: verdict.relevance_score,
                            reasoning: verdict.reasoning.clone(),
                        })
                        .await;
                    if verdict.is_relevant {
                        relevant.push(verdict.profile.clone());
                    }
                    adjudicated.push(verdict);
                }
                Err(Error::Cancelled) => return,
                Err(e) => {
                    tracing::warn!(index, error = %e, "candidate evaluation failed");
                    adjudicated.push(AdjudicationResult::failed(profile, &e.to_string()));
                    let _ = tx
                        .send(AdjudicatorEvent::ProfileError {
                            index,
                            profile_name,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        }

        let confidence = if adjudicated.is_empty() {
            0.0
        } else {
            adjudicated.iter().map(|a| a.confidence).sum::<f64>() / adjudicated.len() as f64
        };
        let rejection_summary = rejection_summary(&adjudicated);

        let _ = tx
            .send(AdjudicatorEvent::Complete {
                data: AdjudicatorOutput {
                    adjudicated_profiles: adjudicated,
                    relevant_profiles: relevant,
                    rejection_summary,
                    adjudication_confidence: confidence,
                },
            })
            .await;
    }

    /// One streaming evaluation: forward cumulative partial text, then
    /// parse the verdict from the accumulated reply.
    async fn evaluate(
        &self,
        query: &str,
        context: Option<&str>,
        profile: &ProfileMatch,
        threshold: f64,
        index: usize,
        tx: &mpsc::Sender<AdjudicatorEvent>,
        cancel: &CancelToken,
    ) -> Result<AdjudicationResult> {
        let req = prompts::adjudication_request(
            query,
            &profile.profile_text,
            profile.similarity_score,
            threshold,
            context,
        );
        let mut stream = self.llm.stream(req, cancel).await?;

        let mut accumulated = String::new();
        let mut last_emitted = 0usize;

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token { text } => {
                    accumulated.push_str(&text);
                    if accumulated.len() - last_emitted >= STREAM_COALESCE_CHARS {
                        last_emitted = accumulated.len();
                        let _ = tx
                            .send(AdjudicatorEvent::ProfileStreaming {
                                index,
                                partial_text: accumulated.clone(),
                            })
                            .await;
                    }
                }
                StreamEvent::Done { .. } => break,
                StreamEvent::Error { message } => {
                    return Err(Error::Provider {
                        provider: "adjudicator-stream".into(),
                        message,
                    });
                }
            }
        }

        // Flush whatever arrived after the last coalesced frame.
        if accumulated.len() > last_emitted {
            let _ = tx
                .send(AdjudicatorEvent::ProfileStreaming {
                    index,
                    partial_text: accumulated.clone(),
                })
                .await;
        }

        let raw: RawVerdict = parse_structured(&accumulated).map_err(Error::Parse)?;
        Ok(AdjudicationResult::from_score(
            profile.clone(),
            raw.relevance_score,
            raw.reasoning,
            raw.confidence_level,
            threshold,
        ))
    }
}

/// One sentence bucketing rejection reasons by coarse keyword.
fn rejection_summary(adjudicated: &[AdjudicationResult]) -> String {
    let rejected: Vec<&AdjudicationResult> =
        adjudicated.iter().filter(|a| !a.is_relevant).collect();
    if rejected.is_empty() {
        return "No profiles were rejected.".into();
    }

    // Insertion-ordered buckets so the sentence reads stably.
    let buckets = [
        ("location mismatch", "location"),
        ("service mismatch", "service"),
        ("expertise mismatch", "expertise"),
    ];
    let mut counts: Vec<(&str, usize)> = Vec::new();
    let mut other = 0usize;

    for result in &rejected {
        let reasoning = result.reasoning.to_lowercase();
        match buckets.iter().find(|(_, keyword)| reasoning.contains(keyword)) {
            Some((label, _)) => match counts.iter_mut().find(|(l, _)| l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((label, 1)),
            },
            None => other += 1,
        }
    }
    if other > 0 {
        counts.push(("other reasons", other));
    }

    let reasons: Vec<String> = counts
        .iter()
        .map(|(label, n)| format!("{label} ({n})"))
        .collect();
    format!(
        "Rejected {} profiles. Main reasons: {}",
        rejected.len(),
        reasons.join(", ")
    )
}
