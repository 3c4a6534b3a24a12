use async_trait::async_trait;
use log::trace;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

pub mod events;
pub mod topics;

const CHANNEL_CAPACITY: usize = 256;

/// Pub/sub fan-out for live state-change events. Publishes are at-most-once:
/// a topic with no subscribers drops the payload, and subscribers are
/// independent of one another.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value);
    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value>;
}

#[derive(Default)]
pub struct BroadcastBus {
    topics: RwLock<HashMap<String, broadcast::Sender<Value>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for BroadcastBus {
    async fn publish(&self, topic: &str, payload: Value) {
        let topics = self.topics.read().await;
        if let Some(sender) = topics.get(topic) {
            // No receivers is fine; delivery is best effort.
            let delivered = sender.send(payload).unwrap_or(0);
            trace!("published to {topic} ({delivered} receivers)");
        } else {
            trace!("published to {topic} (no subscribers)");
        }
    }

    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}
