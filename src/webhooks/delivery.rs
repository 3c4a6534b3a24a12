//! Queue-side delivery worker. Owns the bounded retry contract: an attempt
//! row ends in `success` or `failed`, never limbo.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::WebhookStore;
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::DeliveryStatus;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DeliveryWorker {
    store: Arc<dyn WebhookStore>,
    http: reqwest::Client,
    max_attempts: i32,
}

impl DeliveryWorker {
    pub fn new(store: Arc<dyn WebhookStore>, max_attempts: i32) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            max_attempts,
        }
    }

    /// One delivery try. Returns `Err` only when the queue should schedule
    /// another try; terminal outcomes (success, exhausted, inactive
    /// subscription) return `Ok` so the task stops.
    pub async fn deliver(&self, attempt_id: Uuid) -> CoreResult<()> {
        let mut attempt = self.store.get_attempt(attempt_id).await?;
        if attempt.status != DeliveryStatus::Pending.as_str() {
            return Ok(());
        }

        let subscription = self.store.get_subscription(attempt.subscription_id).await?;
        if !subscription.is_active {
            attempt.status = DeliveryStatus::Failed.as_str().to_string();
            attempt.last_error = Some("subscription deactivated".to_string());
            attempt.updated_at = chrono::Utc::now();
            self.store.update_attempt(&attempt).await?;
            return Ok(());
        }

        let error = match self
            .http
            .post(&subscription.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&attempt.payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                attempt.status = DeliveryStatus::Success.as_str().to_string();
                attempt.last_error = None;
                attempt.updated_at = chrono::Utc::now();
                self.store.update_attempt(&attempt).await?;
                info!(
                    "webhook delivered: event={} subscription={}",
                    attempt.event, subscription.id
                );
                return Ok(());
            }
            Ok(response) => format!("endpoint returned {}", response.status()),
            Err(e) => format!("request failed: {e}"),
        };

        attempt.last_error = Some(error.clone());
        attempt.updated_at = chrono::Utc::now();
        if attempt.attempt >= self.max_attempts {
            attempt.status = DeliveryStatus::Failed.as_str().to_string();
            self.store.update_attempt(&attempt).await?;
            warn!(
                "webhook delivery failed terminally: event={} subscription={} error={}",
                attempt.event, subscription.id, error
            );
            return Ok(());
        }

        attempt.attempt += 1;
        self.store.update_attempt(&attempt).await?;
        Err(CoreError::Delivery(error))
    }
}
