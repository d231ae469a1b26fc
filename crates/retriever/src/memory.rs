//! In-process profile index.
//!
//! Used by tests across the workspace and by local development without a
//! profile database. Semantic matching uses a deterministic bag-of-words
//! hash embedding so that related texts land near each other without any
//! external embeddings provider.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use gb_domain::error::Result;

use crate::index::{ProfileIndex, SemanticHit};

const DIM: usize = 64;

/// Deterministic bag-of-words embedding: each lowercase token bumps one of
/// 64 hash buckets. Texts sharing vocabulary get low cosine distance.
pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut vec = vec![0.0f32; DIM];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.to_lowercase().hash(&mut hasher);
        vec[(hasher.finish() % DIM as u64) as usize] += 1.0;
    }
    vec
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

struct StoredProfile {
    id: i64,
    text: String,
    tags: Vec<String>,
    embedding: Vec<f32>,
}

#[derive(Default)]
pub struct MemoryProfileIndex {
    profiles: Vec<StoredProfile>,
}

impl MemoryProfileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a profile; the embedding is derived from its text.
    pub fn insert(&mut self, id: i64, text: &str, tags: &[&str]) {
        self.insert_with_embedding(id, text, tags, hash_embedding(text));
    }

    /// Insert a profile with an explicit embedding (for tests that need
    /// exact distances).
    pub fn insert_with_embedding(&mut self, id: i64, text: &str, tags: &[&str], embedding: Vec<f32>) {
        self.profiles.push(StoredProfile {
            id,
            text: text.to_owned(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            embedding,
        });
    }
}

#[async_trait::async_trait]
impl ProfileIndex for MemoryProfileIndex {
    async fn semantic_hits(&self, query: &str, limit: usize) -> Result<Vec<SemanticHit>> {
        let query_vec = hash_embedding(query);
        let mut hits: Vec<SemanticHit> = self
            .profiles
            .iter()
            .map(|p| SemanticHit {
                profile_id: p.id,
                cosine_distance: cosine_distance(&query_vec, &p.embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.cosine_distance
                .partial_cmp(&b.cosine_distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn profiles_matching_tag(&self, tag: &str) -> Result<Vec<i64>> {
        Ok(self
            .profiles
            .iter()
            .filter(|p| p.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
            .map(|p| p.id)
            .collect())
    }

    async fn profile_text(&self, profile_id: i64) -> Result<Option<String>> {
        Ok(self
            .profiles
            .iter()
            .find(|p| p.id == profile_id)
            .map(|p| p.text.clone()))
    }

    async fn count_total(&self) -> Result<u64> {
        Ok(self.profiles.len() as u64)
    }
}
