//! Background task queue. Chat-path code enqueues and forgets; the worker
//! loop owns retries so a slow webhook endpoint or SMTP server never blocks
//! a conversation turn.

use async_trait::async_trait;
use log::{error, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::shared::errors::{CoreError, CoreResult};

pub mod router;

pub use router::TaskRouter;

#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    WebhookDelivery {
        attempt_id: Uuid,
    },
    EmailNotification {
        to: String,
        subject: String,
        body: String,
    },
    ReindexConversation {
        agent_id: Uuid,
        session_id: Uuid,
    },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WebhookDelivery { .. } => "webhook_delivery",
            Self::EmailNotification { .. } => "email_notification",
            Self::ReindexConversation { .. } => "reindex_conversation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before the given attempt (1-based; no wait before
    /// the first).
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_backoff * 2u32.saturating_pow(attempt - 2)
    }
}

/// Executes one task. Implementations live next to the feature that owns the
/// task kind; the queue only schedules.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> CoreResult<()>;
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> CoreResult<()>;
}

/// mpsc-backed queue with a single worker loop.
pub struct TokioTaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl TokioTaskQueue {
    pub fn start(handler: Arc<dyn TaskHandler>, policy: RetryPolicy) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                run_with_retries(handler.as_ref(), &task, &policy).await;
            }
        });
        Self { tx }
    }
}

async fn run_with_retries(handler: &dyn TaskHandler, task: &Task, policy: &RetryPolicy) {
    for attempt in 1..=policy.max_attempts {
        let wait = policy.backoff_before(attempt);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        match handler.handle(task).await {
            Ok(()) => return,
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    "task {} attempt {}/{} failed: {}",
                    task.kind(),
                    attempt,
                    policy.max_attempts,
                    e
                );
            }
            Err(e) => {
                error!(
                    "task {} exhausted {} attempts: {}",
                    task.kind(),
                    policy.max_attempts,
                    e
                );
            }
        }
    }
}

#[async_trait]
impl TaskQueue for TokioTaskQueue {
    async fn enqueue(&self, task: Task) -> CoreResult<()> {
        self.tx
            .send(task)
            .map_err(|_| CoreError::Delivery("task queue worker is gone".to_string()))
    }
}

/// Test double that records tasks instead of running them.
#[derive(Default)]
pub struct CollectingQueue {
    tasks: tokio::sync::Mutex<Vec<Task>>,
}

impl CollectingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drained(&self) -> Vec<Task> {
        self.tasks.lock().await.drain(..).collect()
    }
}

#[async_trait]
impl TaskQueue for CollectingQueue {
    async fn enqueue(&self, task: Task) -> CoreResult<()> {
        self.tasks.lock().await.push(task);
        Ok(())
    }
}
