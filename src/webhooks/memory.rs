use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::WebhookStore;
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::{DeliveryAttempt, WebhookSubscription};

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<Uuid, WebhookSubscription>,
    attempts: HashMap<Uuid, DeliveryAttempt>,
}

#[derive(Default)]
pub struct MemoryWebhookStore {
    inner: Mutex<Inner>,
}

impl MemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn insert_subscription(
        &self,
        subscription: WebhookSubscription,
    ) -> CoreResult<WebhookSubscription> {
        self.inner
            .lock()
            .await
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn subscriptions_for_owner(&self, owner: Uuid) -> CoreResult<Vec<WebhookSubscription>> {
        Ok(self
            .inner
            .lock()
            .await
            .subscriptions
            .values()
            .filter(|s| s.owner_user_id == owner)
            .cloned()
            .collect())
    }

    async fn get_subscription(&self, id: Uuid) -> CoreResult<WebhookSubscription> {
        self.inner
            .lock()
            .await
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("webhook subscription"))
    }

    async fn insert_attempt(&self, attempt: DeliveryAttempt) -> CoreResult<DeliveryAttempt> {
        self.inner
            .lock()
            .await
            .attempts
            .insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn get_attempt(&self, id: Uuid) -> CoreResult<DeliveryAttempt> {
        self.inner
            .lock()
            .await
            .attempts
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("delivery attempt"))
    }

    async fn update_attempt(&self, attempt: &DeliveryAttempt) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.attempts.contains_key(&attempt.id) {
            return Err(CoreError::NotFound("delivery attempt"));
        }
        inner.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }
}
