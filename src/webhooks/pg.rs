use async_trait::async_trait;
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use super::WebhookStore;
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::{DeliveryAttempt, WebhookSubscription};
use crate::shared::schema::{delivery_attempts, webhook_subscriptions};
use crate::shared::utils::DbPool;

pub struct PgWebhookStore {
    pool: DbPool,
}

impl PgWebhookStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn blocking<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CoreError::Other(anyhow::anyhow!("blocking task panicked: {e}")))?
    }
}

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn insert_subscription(
        &self,
        subscription: WebhookSubscription,
    ) -> CoreResult<WebhookSubscription> {
        self.blocking(move |conn| {
            diesel::insert_into(webhook_subscriptions::table)
                .values(&subscription)
                .execute(conn)?;
            Ok(subscription)
        })
        .await
    }

    async fn subscriptions_for_owner(&self, owner: Uuid) -> CoreResult<Vec<WebhookSubscription>> {
        self.blocking(move |conn| {
            Ok(webhook_subscriptions::table
                .filter(webhook_subscriptions::owner_user_id.eq(owner))
                .load::<WebhookSubscription>(conn)?)
        })
        .await
    }

    async fn get_subscription(&self, id: Uuid) -> CoreResult<WebhookSubscription> {
        self.blocking(move |conn| {
            webhook_subscriptions::table
                .filter(webhook_subscriptions::id.eq(id))
                .first::<WebhookSubscription>(conn)
                .optional()?
                .ok_or(CoreError::NotFound("webhook subscription"))
        })
        .await
    }

    async fn insert_attempt(&self, attempt: DeliveryAttempt) -> CoreResult<DeliveryAttempt> {
        self.blocking(move |conn| {
            diesel::insert_into(delivery_attempts::table)
                .values(&attempt)
                .execute(conn)?;
            Ok(attempt)
        })
        .await
    }

    async fn get_attempt(&self, id: Uuid) -> CoreResult<DeliveryAttempt> {
        self.blocking(move |conn| {
            delivery_attempts::table
                .filter(delivery_attempts::id.eq(id))
                .first::<DeliveryAttempt>(conn)
                .optional()?
                .ok_or(CoreError::NotFound("delivery attempt"))
        })
        .await
    }

    async fn update_attempt(&self, attempt: &DeliveryAttempt) -> CoreResult<()> {
        let attempt = attempt.clone();
        self.blocking(move |conn| {
            diesel::update(delivery_attempts::table.filter(delivery_attempts::id.eq(attempt.id)))
                .set(&attempt)
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}
