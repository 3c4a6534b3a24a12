use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::shared::errors::CoreResult;

pub mod memory;
pub mod qdrant;

pub use memory::MemoryVectorStore;
pub use qdrant::QdrantStore;

/// Payload filter applied server-side during search. Collections are shared
/// across tenants; every point carries its owning agent in the payload.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub agent_id: Option<Uuid>,
}

impl SearchFilter {
    pub fn for_agent(agent_id: Uuid) -> Self {
        Self {
            agent_id: Some(agent_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub id: Uuid,
    pub score: f64,
    pub payload: Value,
}

impl ScoredHit {
    pub fn content(&self) -> String {
        self.payload["content"].as_str().unwrap_or("").to_string()
    }

    /// Source timestamp used to break score ties, newest first.
    pub fn source_created_at(&self) -> Option<&str> {
        self.payload["created_at"].as_str()
    }
}

/// Per-collection k-NN search over one of the logical partitions (general
/// knowledge, learned responses).
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> CoreResult<()>;

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> CoreResult<()>;

    /// Returns hits with `score >= min_score`, ordered by score descending,
    /// ties broken by most recent source.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
        min_score: f64,
    ) -> CoreResult<Vec<ScoredHit>>;

    async fn delete(&self, collection: &str, ids: &[Uuid]) -> CoreResult<()>;
}

pub(crate) fn order_hits(hits: &mut [ScoredHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.source_created_at().cmp(&a.source_created_at()))
    });
}
