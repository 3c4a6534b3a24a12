use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::Jsonb;
use serde_json::Value;

use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::utils::DbPool;

/// Enriches a retrieved payload with live structured data. Only consulted
/// for agents in `sql_hydration` mode; a failure downgrades the single
/// result to its unhydrated form instead of aborting the turn.
#[async_trait]
pub trait HydrationService: Send + Sync {
    async fn hydrate(&self, payload: &Value) -> CoreResult<Value>;
}

pub struct NoopHydration;

#[async_trait]
impl HydrationService for NoopHydration {
    async fn hydrate(&self, payload: &Value) -> CoreResult<Value> {
        Ok(payload.clone())
    }
}

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Jsonb)]
    data: Value,
}

/// Runs the payload's `hydration_sql` against Postgres. The statement must
/// project a single `data` jsonb column (`SELECT row_to_json(t) AS data ...`).
pub struct SqlHydration {
    pool: DbPool,
}

impl SqlHydration {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HydrationService for SqlHydration {
    async fn hydrate(&self, payload: &Value) -> CoreResult<Value> {
        let Some(sql) = payload["hydration_sql"].as_str() else {
            return Ok(payload.clone());
        };
        let sql = sql.to_string();
        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || -> CoreResult<Vec<JsonRow>> {
            let mut conn = pool.get()?;
            Ok(diesel::sql_query(sql).load::<JsonRow>(&mut conn)?)
        })
        .await
        .map_err(|e| CoreError::Retrieval(format!("hydration task: {e}")))??;

        let mut hydrated = payload.clone();
        hydrated["hydrated_data"] = Value::Array(rows.into_iter().map(|r| r.data).collect());
        Ok(hydrated)
    }
}
