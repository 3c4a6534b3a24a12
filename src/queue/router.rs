//! Routes queued tasks to the feature that owns each kind.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Task, TaskHandler};
use crate::learning::ConversationIndexer;
use crate::notifications::EmailNotifier;
use crate::shared::errors::{CoreError, CoreResult};
use crate::webhooks::DeliveryWorker;

pub struct TaskRouter {
    delivery: Arc<DeliveryWorker>,
    email: Option<Arc<EmailNotifier>>,
    indexer: Arc<ConversationIndexer>,
}

impl TaskRouter {
    pub fn new(
        delivery: Arc<DeliveryWorker>,
        email: Option<Arc<EmailNotifier>>,
        indexer: Arc<ConversationIndexer>,
    ) -> Self {
        Self {
            delivery,
            email,
            indexer,
        }
    }
}

#[async_trait]
impl TaskHandler for TaskRouter {
    async fn handle(&self, task: &Task) -> CoreResult<()> {
        match task {
            Task::WebhookDelivery { attempt_id } => self.delivery.deliver(*attempt_id).await,
            Task::EmailNotification { to, subject, body } => match &self.email {
                Some(email) => email.send(to, subject, body).await,
                None => Err(CoreError::Delivery(
                    "smtp is not configured, dropping notification".to_string(),
                )),
            },
            Task::ReindexConversation {
                agent_id,
                session_id,
            } => self.indexer.reindex(*agent_id, *session_id).await,
        }
    }
}
