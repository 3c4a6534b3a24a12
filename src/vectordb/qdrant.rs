use async_trait::async_trait;
use log::debug;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, Condition, CreateCollectionBuilder,
    DeletePointsBuilder, Distance, Filter, PointId, PointStruct, PointsIdsList,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::Value;
use uuid::Uuid;

use super::{order_hits, ScoredHit, SearchFilter, VectorRecord, VectorStore};
use crate::config::QdrantConfig;
use crate::shared::errors::{CoreError, CoreResult};

pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    pub fn connect(config: &QdrantConfig) -> CoreResult<Self> {
        let mut builder = Qdrant::from_url(&config.url);
        if let Some(api_key) = &config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| CoreError::Retrieval(format!("qdrant connect: {e}")))?;
        Ok(Self { client })
    }
}

fn to_payload(value: &Value) -> CoreResult<Payload> {
    Payload::try_from(value.clone())
        .map_err(|e| CoreError::Retrieval(format!("qdrant payload: {e}")))
}

fn qdrant_value_to_json(value: &qdrant_client::qdrant::Value) -> Value {
    match &value.kind {
        Some(Kind::DoubleValue(v)) => serde_json::json!(v),
        Some(Kind::IntegerValue(v)) => serde_json::json!(v),
        Some(Kind::StringValue(v)) => Value::String(v.clone()),
        Some(Kind::BoolValue(v)) => Value::Bool(*v),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .iter()
                .map(|(k, v)| (k.clone(), qdrant_value_to_json(v)))
                .collect(),
        ),
        Some(Kind::ListValue(l)) => {
            Value::Array(l.values.iter().map(qdrant_value_to_json).collect())
        }
        _ => Value::Null,
    }
}

fn point_uuid(id: Option<&PointId>) -> Option<Uuid> {
    match id?.point_id_options.as_ref()? {
        PointIdOptions::Uuid(s) => Uuid::parse_str(s).ok(),
        PointIdOptions::Num(_) => None,
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> CoreResult<()> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| CoreError::Retrieval(format!("qdrant: {e}")))?;
        if exists {
            return Ok(());
        }
        debug!("creating qdrant collection {collection} ({dimensions} dims)");
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection).vectors_config(
                    VectorParamsBuilder::new(dimensions as u64, Distance::Cosine),
                ),
            )
            .await
            .map_err(|e| CoreError::Retrieval(format!("qdrant: {e}")))?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> CoreResult<()> {
        let mut points = Vec::with_capacity(records.len());
        for record in records {
            points.push(PointStruct::new(
                record.id.to_string(),
                record.vector,
                to_payload(&record.payload)?,
            ));
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points))
            .await
            .map_err(|e| CoreError::Retrieval(format!("qdrant upsert: {e}")))?;
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
        let mut builder = SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64)
            .with_payload(true)
            .score_threshold(min_score as f32);

        if let Some(agent_id) = filter.agent_id {
            builder = builder.filter(Filter::must([Condition::matches(
                "agent_id",
                agent_id.to_string(),
            )]));
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| CoreError::Retrieval(format!("qdrant search: {e}")))?;

        let mut hits: Vec<ScoredHit> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_uuid(point.id.as_ref())?;
                let payload = Value::Object(
                    point
                        .payload
                        .iter()
                        .map(|(k, v)| (k.clone(), qdrant_value_to_json(v)))
                        .collect(),
                );
                Some(ScoredHit {
                    id,
                    score: point.score as f64,
                    payload,
                })
            })
            .collect();

        order_hits(&mut hits);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, ids: &[Uuid]) -> CoreResult<()> {
        let ids: Vec<PointId> = ids.iter().map(|id| id.to_string().into()).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection).points(PointsIdsList { ids }),
            )
            .await
            .map_err(|e| CoreError::Retrieval(format!("qdrant delete: {e}")))?;
        Ok(())
    }
}
