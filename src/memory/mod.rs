//! Precedent memory: five isolated, append-only collections
//!
//! Each role group owns one collection of situation/recommendation records.
//! Retrieval is hybrid (keyword + semantic); if the embedding backend is
//! down the call degrades to keyword-only ranking instead of failing.

pub mod embedding;
pub mod retrieval;

pub use embedding::{EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider};

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::models::MemoryCollection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One stored precedent. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub record_id: Uuid,
    pub situation: String,
    pub recommendation: String,
    embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// One retrieval match with its score breakdown.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub keyword_score: f32,
    /// Absent when the call ran in degraded (keyword-only) mode.
    pub semantic_score: Option<f32>,
    pub combined_score: f32,
}

/// Result of one retrieve call. `degraded` marks that the semantic backend
/// was unavailable and ranking fell back to keyword-only.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub matches: Vec<ScoredMemory>,
    pub degraded: bool,
}

impl RetrievalResult {
    pub fn cited_ids(&self) -> Vec<Uuid> {
        self.matches.iter().map(|m| m.record.record_id).collect()
    }
}

/// Append-only store fronting the five role-group collections.
pub struct MemoryStore {
    collections: HashMap<MemoryCollection, Arc<RwLock<Vec<MemoryRecord>>>>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: MemoryConfig) -> Self {
        let collections = MemoryCollection::ALL
            .iter()
            .map(|c| (*c, Arc::new(RwLock::new(Vec::new()))))
            .collect();

        Self {
            collections,
            embedder,
            config,
        }
    }

    fn collection(&self, collection: MemoryCollection) -> Arc<RwLock<Vec<MemoryRecord>>> {
        // All five collections are created in `new`; the lookup cannot miss.
        Arc::clone(&self.collections[&collection])
    }

    /// Append one record with a freshly computed embedding. Writes never
    /// block retrieval of existing records beyond the collection lock.
    pub async fn write(
        &self,
        collection: MemoryCollection,
        situation: &str,
        recommendation: &str,
    ) -> Result<Uuid> {
        let embedding = self.embedder.embed(situation).await?;

        let record = MemoryRecord {
            record_id: Uuid::new_v4(),
            situation: situation.to_string(),
            recommendation: recommendation.to_string(),
            embedding,
            created_at: Utc::now(),
        };
        let record_id = record.record_id;

        let store = self.collection(collection);
        store.write().await.push(record);

        debug!(%collection, %record_id, "memory record written");
        Ok(record_id)
    }

    /// Hybrid retrieval: every candidate gets a keyword score and, when the
    /// embedding backend answers, a semantic score; results are ordered by
    /// the combined score, ties broken by most-recent record first. This
    /// call never fails: an unreachable semantic backend forces alpha to 0
    /// for the duration of the call.
    pub async fn retrieve(
        &self,
        collection: MemoryCollection,
        query: &str,
        limit: usize,
        alpha: f32,
    ) -> RetrievalResult {
        let alpha = alpha.clamp(0.0, 1.0);

        let (query_embedding, degraded) = match self.embedder.embed(query).await {
            Ok(v) => (Some(v), false),
            Err(e) => {
                warn!(%collection, error = %e, "semantic backend unavailable, keyword-only ranking");
                (None, true)
            }
        };
        let effective_alpha = if degraded { 0.0 } else { alpha };

        let store = self.collection(collection);
        let records = store.read().await;

        let mut scored: Vec<ScoredMemory> = records
            .iter()
            .map(|record| {
                let keyword = retrieval::keyword_score(query, &record.situation);
                let semantic = query_embedding
                    .as_ref()
                    .map(|q| retrieval::semantic_score(q, &record.embedding));
                let combined = retrieval::combined_score(
                    effective_alpha,
                    semantic.unwrap_or(0.0),
                    keyword,
                );
                ScoredMemory {
                    record: record.clone(),
                    keyword_score: keyword,
                    semantic_score: semantic,
                    combined_score: combined,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        });
        scored.truncate(limit);

        info!(
            %collection,
            matches = scored.len(),
            degraded,
            "memory retrieval complete"
        );

        RetrievalResult {
            matches: scored,
            degraded,
        }
    }

    /// Alpha for a collection, honoring per-collection overrides.
    pub fn alpha_for(&self, collection: MemoryCollection) -> f32 {
        self.config.alpha_for(collection)
    }

    pub fn limit(&self) -> usize {
        self.config.default_limit
    }

    pub async fn len(&self, collection: MemoryCollection) -> usize {
        self.collection(collection).read().await.len()
    }

    /// Format matches the way agent prompts expect past lessons.
    pub fn format_matches(result: &RetrievalResult) -> String {
        if result.matches.is_empty() {
            return "No past memories found.".to_string();
        }
        result
            .matches
            .iter()
            .enumerate()
            .map(|(i, m)| {
                format!(
                    "{}. Situation: {}\n   Lesson: {}",
                    i + 1,
                    m.record.situation,
                    m.record.recommendation
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CouncilError;

    /// Embedder that always fails, to exercise degraded mode.
    struct DownEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(CouncilError::Embedding("backend unreachable".to_string()))
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new(
            Arc::new(HashEmbeddingProvider::default()),
            MemoryConfig {
                embedded: true,
                embedding_url: String::new(),
                embedding_model: String::new(),
                default_alpha: 0.5,
                default_limit: 2,
                alpha_overrides: HashMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = store();
        store
            .write(MemoryCollection::BullResearcher, "rally setup", "buy dips")
            .await
            .unwrap();

        let other = store
            .retrieve(MemoryCollection::BearResearcher, "rally setup", 5, 0.5)
            .await;
        assert!(other.matches.is_empty());

        let own = store
            .retrieve(MemoryCollection::BullResearcher, "rally setup", 5, 0.5)
            .await;
        assert_eq!(own.matches.len(), 1);
    }

    #[tokio::test]
    async fn retrieval_is_deterministic_for_fixed_inputs() {
        let store = store();
        for (situation, lesson) in [
            ("high inflation with rising rates", "favor defensives"),
            ("tech selloff on institutional pressure", "trim growth"),
            ("sector rotation into value", "rebalance"),
        ] {
            store
                .write(MemoryCollection::Analyst, situation, lesson)
                .await
                .unwrap();
        }

        let first = store
            .retrieve(MemoryCollection::Analyst, "rising rates and rotation", 3, 0.6)
            .await;
        let second = store
            .retrieve(MemoryCollection::Analyst, "rising rates and rotation", 3, 0.6)
            .await;

        let ids_first: Vec<Uuid> = first.cited_ids();
        let ids_second: Vec<Uuid> = second.cited_ids();
        assert_eq!(ids_first, ids_second);
        assert!(!first.degraded);
    }

    #[tokio::test]
    async fn degraded_mode_returns_keyword_ranking() {
        // Records written with a working embedder, then queried with the
        // backend down.
        let working = store();
        working
            .write(MemoryCollection::RiskManager, "volatility spike risk", "cut size")
            .await
            .unwrap();
        working
            .write(MemoryCollection::RiskManager, "calm uptrend", "hold steady")
            .await
            .unwrap();

        let degraded_store = MemoryStore {
            collections: working.collections.clone(),
            embedder: Arc::new(DownEmbedder),
            config: working.config.clone(),
        };

        let result = degraded_store
            .retrieve(MemoryCollection::RiskManager, "volatility spike", 2, 0.6)
            .await;

        assert!(result.degraded);
        assert_eq!(result.matches.len(), 2);
        // Keyword-only ranking puts the overlapping situation first.
        assert_eq!(result.matches[0].record.situation, "volatility spike risk");
        assert!(result.matches[0].semantic_score.is_none());
    }

    #[tokio::test]
    async fn ties_break_by_recency() {
        let store = store();
        let _older = store
            .write(MemoryCollection::Trader, "flat market", "stay out")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = store
            .write(MemoryCollection::Trader, "flat market", "stay out")
            .await
            .unwrap();

        let result = store
            .retrieve(MemoryCollection::Trader, "flat market", 1, 0.5)
            .await;
        assert_eq!(result.matches[0].record.record_id, newer);
    }
}
