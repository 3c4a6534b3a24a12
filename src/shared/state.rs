use std::sync::Arc;

use crate::broadcast::MessageBus;
use crate::config::AppConfig;
use crate::dispatcher::DispatcherService;
use crate::notifications::PresenceRegistry;
use crate::queue::TaskQueue;
use crate::session::SessionStore;
use crate::shared::cache::CacheStore;
use crate::webhooks::WebhookStore;

/// Shared handles for the HTTP/WS layer. Cheap to clone behind `Arc`.
pub struct AppState {
    pub config: AppConfig,
    pub sessions: Arc<dyn SessionStore>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub bus: Arc<dyn MessageBus>,
    pub queue: Arc<dyn TaskQueue>,
    pub cache: Arc<dyn CacheStore>,
    pub presence: Arc<PresenceRegistry>,
    pub dispatcher: Arc<DispatcherService>,
}
