//! SQLite-backed profile index.
//!
//! Schema (owned by the onboarding pipeline, opened read-only here):
//!
//! ```sql
//! CREATE TABLE profiles (
//!   id           INTEGER PRIMARY KEY,
//!   profile_text TEXT NOT NULL,
//!   embedding    TEXT NOT NULL   -- JSON array of f32
//! );
//! CREATE TABLE profile_tags (
//!   profile_id INTEGER NOT NULL REFERENCES profiles(id),
//!   tag        TEXT NOT NULL
//! );
//! ```
//!
//! Embeddings are precomputed at onboarding time; at query time only the
//! query itself is embedded and cosine distances are computed in process.

use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use gb_domain::error::{Error, Result};

use crate::index::{Embedder, ProfileIndex, SemanticHit};

pub struct SqliteProfileIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SqliteProfileIndex {
    /// Open the profile database read-only.
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        tracing::info!(path = %path.display(), "profile index opened");
        Ok(Self { pool, embedder })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        Self { pool, embedder }
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Db(e.to_string())
}

/// Cosine distance between two vectors; 1.0 when either norm is zero or
/// the dimensions disagree.
fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait::async_trait]
impl ProfileIndex for SqliteProfileIndex {
    async fn semantic_hits(&self, query: &str, limit: usize) -> Result<Vec<SemanticHit>> {
        let query_vec = self.embedder.embed_query(query).await?;

        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, embedding FROM profiles")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut hits: Vec<SemanticHit> = Vec::with_capacity(rows.len());
        for (profile_id, embedding_json) in rows {
            let embedding: Vec<f32> = match serde_json::from_str(&embedding_json) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(profile_id, error = %e, "skipping profile with malformed embedding");
                    continue;
                }
            };
            hits.push(SemanticHit {
                profile_id,
                cosine_distance: cosine_distance(&query_vec, &embedding),
            });
        }

        hits.sort_by(|a, b| {
            a.cosine_distance
                .partial_cmp(&b.cosine_distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn profiles_matching_tag(&self, tag: &str) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT profile_id FROM profile_tags WHERE tag = ?1 COLLATE NOCASE",
        )
        .bind(tag)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn profile_text(&self, profile_id: i64) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT profile_text FROM profiles WHERE id = ?1")
                .bind(profile_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|(text,)| text))
    }

    async fn count_total(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count as u64)
    }
}
