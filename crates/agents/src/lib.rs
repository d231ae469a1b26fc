//! The agent pipeline: Search → Adjudicator → Summarizer, driven by the
//! workflow coordinator, routed per turn by the orchestrator.
//!
//! Every agent exposes `run(...) -> mpsc::Receiver<Event>` backed by a
//! bounded channel: producers block when the consumer lags, nothing is
//! dropped, and event order is the production order.

pub mod adjudicator;
pub mod conversational;
pub mod events;
pub mod multiplex;
pub mod orchestrator;
pub mod profile_text;
pub mod prompts;
pub mod search;
pub mod suggestions;
pub mod summarizer;
pub mod testing;
pub mod workflow;

pub use adjudicator::AdjudicatorAgent;
pub use conversational::ConversationalResponder;
pub use events::{AgentEvent, TurnEvent, WorkflowEvent, WorkflowStatistics};
pub use multiplex::{Frame, FrameKind, Multiplexer};
pub use orchestrator::{Orchestrator, TurnRequest};
pub use search::SearchAgent;
pub use summarizer::SummarizerAgent;
pub use workflow::Workflow;

/// Bounded capacity of every agent event channel. Small on purpose: a slow
/// consumer exerts backpressure instead of buffering a whole pipeline run.
pub const CHANNEL_CAPACITY: usize = 32;
