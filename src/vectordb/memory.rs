use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{order_hits, ScoredHit, SearchFilter, VectorRecord, VectorStore};
use crate::shared::errors::{CoreError, CoreResult};

/// Cosine-similarity store held in process memory. Backs single-node dev
/// setups and the test suite; the production backend is [`super::QdrantStore`].
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

fn matches_filter(payload: &Value, filter: &SearchFilter) -> bool {
    match filter.agent_id {
        Some(agent_id) => payload["agent_id"].as_str() == Some(agent_id.to_string().as_str()),
        None => true,
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, collection: &str, _dimensions: usize) -> CoreResult<()> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> CoreResult<()> {
        let mut collections = self.collections.write().await;
        let points = collections.entry(collection.to_string()).or_default();
        for record in records {
            points.retain(|p| p.id != record.id);
            points.push(record);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
        min_score: f64,
    ) -> CoreResult<Vec<ScoredHit>> {
        let collections = self.collections.read().await;
        let points = collections
            .get(collection)
            .ok_or(CoreError::Retrieval(format!(
                "unknown collection `{collection}`"
            )))?;

        let mut hits: Vec<ScoredHit> = points
            .iter()
            .filter(|p| matches_filter(&p.payload, filter))
            .map(|p| ScoredHit {
                id: p.id,
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|hit| hit.score >= min_score)
            .collect();

        order_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, ids: &[Uuid]) -> CoreResult<()> {
        let mut collections = self.collections.write().await;
        if let Some(points) = collections.get_mut(collection) {
            points.retain(|p| !ids.contains(&p.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(vector: Vec<f32>, agent_id: Uuid, content: &str, created_at: &str) -> VectorRecord {
        VectorRecord {
            id: Uuid::new_v4(),
            vector,
            payload: json!({
                "agent_id": agent_id.to_string(),
                "content": content,
                "created_at": created_at,
            }),
        }
    }

    #[tokio::test]
    async fn search_is_scored_filtered_and_capped() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("kb", 2).await.unwrap();

        let agent = Uuid::new_v4();
        let other = Uuid::new_v4();
        store
            .upsert(
                "kb",
                vec![
                    record(vec![1.0, 0.0], agent, "exact", "2026-01-01T00:00:00Z"),
                    record(vec![0.7, 0.7], agent, "close", "2026-01-02T00:00:00Z"),
                    record(vec![0.0, 1.0], agent, "orthogonal", "2026-01-03T00:00:00Z"),
                    record(vec![1.0, 0.0], other, "other tenant", "2026-01-04T00:00:00Z"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("kb", &[1.0, 0.0], &SearchFilter::for_agent(agent), 5, 0.5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content(), "exact");
        assert_eq!(hits[1].content(), "close");
    }

    #[tokio::test]
    async fn score_ties_break_by_recency() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("kb", 2).await.unwrap();
        let agent = Uuid::new_v4();
        store
            .upsert(
                "kb",
                vec![
                    record(vec![1.0, 0.0], agent, "older", "2026-01-01T00:00:00Z"),
                    record(vec![1.0, 0.0], agent, "newer", "2026-02-01T00:00:00Z"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("kb", &[1.0, 0.0], &SearchFilter::for_agent(agent), 5, 0.0)
            .await
            .unwrap();
        assert_eq!(hits[0].content(), "newer");
    }

    #[tokio::test]
    async fn unknown_collection_is_a_retrieval_error() {
        let store = MemoryVectorStore::new();
        let err = store
            .search("missing", &[1.0], &SearchFilter::default(), 5, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Retrieval(_)));
    }

    #[tokio::test]
    async fn upsert_replaces_existing_point() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("kb", 2).await.unwrap();
        let id = Uuid::new_v4();
        let agent = Uuid::new_v4();
        let make = |content: &str| VectorRecord {
            id,
            vector: vec![1.0, 0.0],
            payload: json!({"agent_id": agent.to_string(), "content": content}),
        };
        store.upsert("kb", vec![make("v1")]).await.unwrap();
        store.upsert("kb", vec![make("v2")]).await.unwrap();

        let hits = store
            .search("kb", &[1.0, 0.0], &SearchFilter::for_agent(agent), 5, 0.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content(), "v2");
    }
}
