use gb_domain::error::Result;

/// A raw semantic match from the underlying index.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub profile_id: i64,
    /// Cosine distance, 0 = identical.
    pub cosine_distance: f64,
}

/// Produces a query embedding for semantic retrieval.
///
/// Implemented for the LLM client in the gateway wiring; tests use a
/// deterministic hash embedder.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// The read-only seam to the provider profile database.
///
/// Implementations return raw hits only; normalization, thresholds and the
/// hybrid combination rule live in [`crate::retriever::Retriever`].
#[async_trait::async_trait]
pub trait ProfileIndex: Send + Sync {
    /// The `limit` closest profiles to `query`, ordered by ascending
    /// cosine distance.
    async fn semantic_hits(&self, query: &str, limit: usize) -> Result<Vec<SemanticHit>>;

    /// Profile ids carrying `tag` (case-insensitive), deduplicated.
    async fn profiles_matching_tag(&self, tag: &str) -> Result<Vec<i64>>;

    /// Fully materialized profile text, `None` when the profile is gone.
    async fn profile_text(&self, profile_id: i64) -> Result<Option<String>>;

    /// Total number of profiles in the database.
    async fn count_total(&self) -> Result<u64>;
}
