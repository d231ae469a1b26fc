//! The retrieval contract: semantic, tag and hybrid search with all
//! normalization and combination rules.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use gb_domain::error::Result;
use gb_domain::model::{ProfileMatch, SearchOutput};

use crate::index::ProfileIndex;

/// Hybrid rule: a profile that matches any requested tag gets this bonus on
/// top of its semantic similarity, capped at 1.0.
const TAG_BONUS: f64 = 0.3;

#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn ProfileIndex>,
}

impl Retriever {
    pub fn new(index: Arc<dyn ProfileIndex>) -> Self {
        Self { index }
    }

    /// Semantic similarity search.
    ///
    /// Over-fetches 2× so the similarity floor does not starve the result
    /// set, normalizes distance to `1 − d` clamped into [0, 1], and returns
    /// at most `max_results` profiles in descending similarity order.
    pub async fn search_semantic(
        &self,
        query: &str,
        max_results: usize,
        min_similarity: f64,
    ) -> Result<SearchOutput> {
        let started = Instant::now();
        let total = self.index.count_total().await?;

        let hits = self.index.semantic_hits(query, max_results * 2).await?;

        let mut candidates = Vec::new();
        let mut seen = BTreeSet::new();
        for hit in hits {
            let similarity = (1.0 - hit.cosine_distance).clamp(0.0, 1.0);
            if similarity < min_similarity || !seen.insert(hit.profile_id) {
                continue;
            }
            if let Some(text) = self.index.profile_text(hit.profile_id).await? {
                candidates.push(ProfileMatch {
                    profile_id: hit.profile_id,
                    similarity_score: similarity,
                    profile_text: text,
                });
            }
        }

        sort_by_score(&mut candidates);
        candidates.truncate(max_results);

        Ok(SearchOutput {
            candidate_profiles: candidates,
            total_profiles_searched: total,
            search_time_seconds: started.elapsed().as_secs_f64(),
            search_strategy: "Vector similarity search using text embeddings".into(),
        })
    }

    /// Tag search. Similarity is the fraction of requested tags a profile
    /// carries; `match_all` keeps only full matches.
    pub async fn search_tags(
        &self,
        tags: &[String],
        match_all: bool,
        max_results: usize,
    ) -> Result<SearchOutput> {
        let started = Instant::now();
        let total = self.index.count_total().await?;

        // Distinct matched-tag count per profile.
        let mut matched: HashMap<i64, usize> = HashMap::new();
        for tag in tags {
            for profile_id in self.index.profiles_matching_tag(tag).await? {
                *matched.entry(profile_id).or_default() += 1;
            }
        }

        let mut candidates = Vec::new();
        for (profile_id, count) in matched {
            if match_all && count < tags.len() {
                continue;
            }
            let Some(text) = self.index.profile_text(profile_id).await? else {
                continue;
            };
            candidates.push(ProfileMatch {
                profile_id,
                similarity_score: count as f64 / tags.len() as f64,
                profile_text: text,
            });
        }

        sort_by_score(&mut candidates);
        candidates.truncate(max_results);

        let mode = if match_all { "ALL" } else { "ANY" };
        Ok(SearchOutput {
            candidate_profiles: candidates,
            total_profiles_searched: total,
            search_time_seconds: started.elapsed().as_secs_f64(),
            search_strategy: format!(
                "Tag-based search ({mode} match) for tags: {}",
                tags.join(", ")
            ),
        })
    }

    /// Hybrid search: semantic similarity plus a flat tag bonus, capped at
    /// 1.0. Ordering is by combined score descending with ties broken by
    /// the semantic score.
    pub async fn search_hybrid(
        &self,
        query: &str,
        tags: &[String],
        max_results: usize,
    ) -> Result<SearchOutput> {
        let started = Instant::now();
        let total = self.index.count_total().await?;

        // No similarity floor here: a weak semantic hit may still clear the
        // bar once the tag bonus lands.
        let semantic = self.search_semantic(query, max_results * 2, 0.0).await?;

        let mut strategy = String::from("Hybrid search (vector similarity + tag scores combined)");
        if tags.is_empty() {
            let mut candidates = semantic.candidate_profiles;
            candidates.truncate(max_results);
            return Ok(SearchOutput {
                candidate_profiles: candidates,
                total_profiles_searched: total,
                search_time_seconds: started.elapsed().as_secs_f64(),
                search_strategy: strategy,
            });
        }
        strategy.push_str(&format!(" with tags: {}", tags.join(", ")));

        let mut tagged: BTreeSet<i64> = BTreeSet::new();
        for tag in tags {
            tagged.extend(self.index.profiles_matching_tag(tag).await?);
        }

        let semantic_by_id: HashMap<i64, &ProfileMatch> = semantic
            .candidate_profiles
            .iter()
            .map(|p| (p.profile_id, p))
            .collect();

        let all_ids: BTreeSet<i64> = semantic_by_id
            .keys()
            .copied()
            .chain(tagged.iter().copied())
            .collect();

        // (combined, semantic, match) triples so ties sort on the semantic
        // component.
        let mut scored: Vec<(f64, f64, ProfileMatch)> = Vec::new();
        for profile_id in all_ids {
            let semantic_score = semantic_by_id
                .get(&profile_id)
                .map(|p| p.similarity_score)
                .unwrap_or(0.0);
            let bonus = if tagged.contains(&profile_id) { TAG_BONUS } else { 0.0 };
            let combined = (semantic_score + bonus).min(1.0);

            let text = match semantic_by_id.get(&profile_id) {
                Some(p) => p.profile_text.clone(),
                None => match self.index.profile_text(profile_id).await? {
                    Some(text) => text,
                    None => continue,
                },
            };

            scored.push((
                combined,
                semantic_score,
                ProfileMatch {
                    profile_id,
                    similarity_score: combined,
                    profile_text: text,
                },
            ));
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
        });

        let candidates: Vec<ProfileMatch> =
            scored.into_iter().take(max_results).map(|(_, _, p)| p).collect();

        Ok(SearchOutput {
            candidate_profiles: candidates,
            total_profiles_searched: total,
            search_time_seconds: started.elapsed().as_secs_f64(),
            search_strategy: strategy,
        })
    }

    /// Direct profile fetch, used for deep-link resolution.
    pub async fn by_id(&self, profile_id: i64) -> Result<Option<ProfileMatch>> {
        Ok(self.index.profile_text(profile_id).await?.map(|text| ProfileMatch {
            profile_id,
            similarity_score: 1.0,
            profile_text: text,
        }))
    }

    pub async fn count_total(&self) -> Result<u64> {
        self.index.count_total().await
    }
}

fn sort_by_score(candidates: &mut [ProfileMatch]) {
    candidates.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.profile_id.cmp(&b.profile_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProfileIndex;

    fn tag_string(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    fn retriever_with(
        profiles: &[(i64, &str, &[&str], Vec<f32>)],
    ) -> Retriever {
        let mut index = MemoryProfileIndex::new();
        for (id, text, tags, embedding) in profiles {
            index.insert_with_embedding(*id, text, tags, embedding.clone());
        }
        Retriever::new(Arc::new(index))
    }

    // Queries embed through the same hash space as documents, so build
    // explicit embeddings with crate::memory::hash_embedding for precision.
    fn embed(text: &str) -> Vec<f32> {
        crate::memory::hash_embedding(text)
    }

    #[tokio::test]
    async fn semantic_orders_and_floors() {
        let query = "tax preparation services for startups";
        let retriever = retriever_with(&[
            (1, "Company Name: Near\nCountry: UAE", &[], embed(query)),
            (2, "Company Name: Far\nCountry: UAE", &[], embed("unrelated welding workshop metal")),
        ]);

        let out = retriever.search_semantic(query, 5, 0.5).await.unwrap();
        assert_eq!(out.candidate_profiles.len(), 1);
        assert_eq!(out.candidate_profiles[0].profile_id, 1);
        assert!(out.candidate_profiles[0].similarity_score > 0.99);
        assert_eq!(out.total_profiles_searched, 2);
    }

    #[tokio::test]
    async fn semantic_respects_max_results() {
        let query = "legal services";
        let profiles: Vec<(i64, String)> = (1..=6)
            .map(|id| (id, format!("Company Name: P{id}\nlegal services provider")))
            .collect();
        let mut index = MemoryProfileIndex::new();
        for (id, text) in &profiles {
            index.insert(*id, text, &[]);
        }
        let retriever = Retriever::new(Arc::new(index));

        let out = retriever.search_semantic(query, 3, 0.0).await.unwrap();
        assert_eq!(out.candidate_profiles.len(), 3);
        // Monotonically non-increasing similarity.
        let scores: Vec<f64> = out
            .candidate_profiles
            .iter()
            .map(|p| p.similarity_score)
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn tag_similarity_is_matched_fraction() {
        let retriever = retriever_with(&[
            (1, "Company Name: Both", &["tax", "audit"], embed("a")),
            (2, "Company Name: One", &["tax"], embed("b")),
            (3, "Company Name: None", &["legal"], embed("c")),
        ]);

        let out = retriever
            .search_tags(&tag_string(&["tax", "audit"]), false, 10)
            .await
            .unwrap();
        assert_eq!(out.candidate_profiles.len(), 2);
        assert_eq!(out.candidate_profiles[0].profile_id, 1);
        assert_eq!(out.candidate_profiles[0].similarity_score, 1.0);
        assert_eq!(out.candidate_profiles[1].similarity_score, 0.5);
        assert!(out.search_strategy.contains("ANY match"));
    }

    #[tokio::test]
    async fn tag_match_all_filters_partial_matches() {
        let retriever = retriever_with(&[
            (1, "Company Name: Both", &["tax", "audit"], embed("a")),
            (2, "Company Name: One", &["tax"], embed("b")),
        ]);

        let out = retriever
            .search_tags(&tag_string(&["tax", "audit"]), true, 10)
            .await
            .unwrap();
        assert_eq!(out.candidate_profiles.len(), 1);
        assert_eq!(out.candidate_profiles[0].profile_id, 1);
        assert!(out.search_strategy.contains("ALL match"));
    }

    #[tokio::test]
    async fn hybrid_bonus_capped_at_one() {
        let query = "tax advisory for tech companies";
        let retriever = retriever_with(&[
            // Perfect semantic match that also carries a tag: would be 1.3
            // uncapped.
            (1, "Company Name: Capped", &["tax"], embed(query)),
            // Tag-only profile: 0.3 combined.
            (2, "Company Name: TagOnly", &["tax"], embed("zzz yyy xxx www")),
        ]);

        let out = retriever
            .search_hybrid(query, &tag_string(&["tax"]), 10)
            .await
            .unwrap();
        assert!(out
            .candidate_profiles
            .iter()
            .all(|p| p.similarity_score <= 1.0));
        assert_eq!(out.candidate_profiles[0].profile_id, 1);
        assert_eq!(out.candidate_profiles[0].similarity_score, 1.0);

        let tag_only = out
            .candidate_profiles
            .iter()
            .find(|p| p.profile_id == 2)
            .unwrap();
        assert!((tag_only.similarity_score - TAG_BONUS).abs() < 0.05);
    }

    #[tokio::test]
    async fn hybrid_without_tags_degenerates_to_semantic() {
        let query = "bookkeeping services";
        let retriever = retriever_with(&[
            (1, "Company Name: A\nbookkeeping services", &[], embed(query)),
            (2, "Company Name: B\nunrelated", &[], embed("qqq rrr")),
        ]);

        let out = retriever.search_hybrid(query, &[], 1).await.unwrap();
        assert_eq!(out.candidate_profiles.len(), 1);
        assert_eq!(out.candidate_profiles[0].profile_id, 1);
        assert!(out.search_strategy.starts_with("Hybrid search"));
    }

    #[tokio::test]
    async fn no_profile_appears_twice() {
        let query = "tax services";
        let retriever = retriever_with(&[(1, "Company Name: Only", &["tax"], embed(query))]);

        let out = retriever
            .search_hybrid(query, &tag_string(&["tax"]), 10)
            .await
            .unwrap();
        assert_eq!(out.candidate_profiles.len(), 1);
    }

    #[tokio::test]
    async fn by_id_fetches_with_unit_similarity() {
        let retriever = retriever_with(&[(7, "Company Name: Direct", &[], embed("x"))]);
        let profile = retriever.by_id(7).await.unwrap().unwrap();
        assert_eq!(profile.similarity_score, 1.0);
        assert!(retriever.by_id(8).await.unwrap().is_none());
    }
}
