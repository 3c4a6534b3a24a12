//! Outbound webhook fan-out. The dispatcher snapshots one envelope per
//! matching subscription and enqueues delivery; it never retries or blocks —
//! that is the delivery worker's job.

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::queue::{Task, TaskQueue};
use crate::shared::errors::CoreResult;
use crate::shared::models::{DeliveryAttempt, DeliveryStatus, Session, WebhookSubscription};

pub mod delivery;
pub mod memory;
pub mod pg;

pub use delivery::DeliveryWorker;
pub use memory::MemoryWebhookStore;
pub use pg::PgWebhookStore;

/// Persistence seam for subscriptions and their delivery log.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn insert_subscription(
        &self,
        subscription: WebhookSubscription,
    ) -> CoreResult<WebhookSubscription>;
    async fn subscriptions_for_owner(&self, owner: Uuid) -> CoreResult<Vec<WebhookSubscription>>;
    async fn get_subscription(&self, id: Uuid) -> CoreResult<WebhookSubscription>;

    async fn insert_attempt(&self, attempt: DeliveryAttempt) -> CoreResult<DeliveryAttempt>;
    async fn get_attempt(&self, id: Uuid) -> CoreResult<DeliveryAttempt>;
    async fn update_attempt(&self, attempt: &DeliveryAttempt) -> CoreResult<()>;
}

/// Envelope sent to subscribers. `session`, when present, exposes only the
/// public identifier.
fn envelope(event: &str, data: &Value, session: Option<&Session>) -> Value {
    let mut body = json!({
        "event": event,
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
    });
    if let Some(session) = session {
        body["session"] = json!({
            "uuid": session.public_id.to_string(),
            "status": session.status,
        });
    }
    body
}

pub struct WebhookDispatcher {
    store: Arc<dyn WebhookStore>,
    queue: Arc<dyn TaskQueue>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn WebhookStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Fans `event` out to every active matching subscription of `owner`:
    /// one pending attempt row and one queued task per subscription.
    pub async fn dispatch(
        &self,
        owner: Uuid,
        event: &str,
        data: &Value,
        session: Option<&Session>,
    ) -> CoreResult<Vec<DeliveryAttempt>> {
        let subscriptions = self.store.subscriptions_for_owner(owner).await?;
        let payload = envelope(event, data, session);

        let mut attempts = Vec::new();
        for subscription in subscriptions.iter().filter(|s| s.matches(event)) {
            let now = Utc::now();
            let attempt = DeliveryAttempt {
                id: Uuid::new_v4(),
                subscription_id: subscription.id,
                event: event.to_string(),
                payload: payload.clone(),
                status: DeliveryStatus::Pending.as_str().to_string(),
                attempt: 1,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            let attempt = self.store.insert_attempt(attempt).await?;
            self.queue
                .enqueue(Task::WebhookDelivery {
                    attempt_id: attempt.id,
                })
                .await?;
            attempts.push(attempt);
        }

        debug!(
            "webhook dispatch: event={} owner={} attempts={}",
            event,
            owner,
            attempts.len()
        );
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::CollectingQueue;
    use crate::shared::models::Session;

    fn subscription(owner: Uuid, events: &[&str], active: bool) -> WebhookSubscription {
        WebhookSubscription {
            id: Uuid::new_v4(),
            owner_user_id: owner,
            url: "https://integrator.example/hook".to_string(),
            events: events.iter().map(|e| e.to_string()).collect(),
            is_active: active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn two_matching_subscriptions_create_two_pending_attempts() {
        let store = Arc::new(MemoryWebhookStore::new());
        let queue = Arc::new(CollectingQueue::new());
        let owner = Uuid::new_v4();

        store
            .insert_subscription(subscription(owner, &["session.completed"], true))
            .await
            .unwrap();
        store
            .insert_subscription(subscription(owner, &["*"], true))
            .await
            .unwrap();
        store
            .insert_subscription(subscription(owner, &["session.escalated"], true))
            .await
            .unwrap();
        store
            .insert_subscription(subscription(owner, &["session.completed"], false))
            .await
            .unwrap();

        let dispatcher = WebhookDispatcher::new(store, queue.clone());
        let attempts = dispatcher
            .dispatch(owner, "session.completed", &json!({"ok": true}), None)
            .await
            .unwrap();

        assert_eq!(attempts.len(), 2);
        for attempt in &attempts {
            assert_eq!(attempt.status, "pending");
            assert_eq!(attempt.attempt, 1);
        }
        assert_eq!(queue.drained().await.len(), 2);
    }

    #[tokio::test]
    async fn envelope_carries_public_session_id_only() {
        let session = Session::new(Uuid::new_v4(), None, None);
        let body = envelope("session.escalated", &json!({"reason": "user_request"}), Some(&session));

        assert_eq!(body["event"], "session.escalated");
        assert_eq!(body["session"]["uuid"], session.public_id.to_string());
        assert!(body["session"].get("id").is_none());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn no_match_means_no_attempts() {
        let store = Arc::new(MemoryWebhookStore::new());
        let queue = Arc::new(CollectingQueue::new());
        let owner = Uuid::new_v4();
        store
            .insert_subscription(subscription(owner, &["message.validated"], true))
            .await
            .unwrap();

        let dispatcher = WebhookDispatcher::new(store, queue.clone());
        let attempts = dispatcher
            .dispatch(owner, "session.completed", &json!({}), None)
            .await
            .unwrap();

        assert!(attempts.is_empty());
        assert!(queue.drained().await.is_empty());
    }
}
