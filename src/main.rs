use anyhow::Context;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

use supportdesk::api;
use supportdesk::broadcast::BroadcastBus;
use supportdesk::config::AppConfig;
use supportdesk::dispatcher::DispatcherService;
use supportdesk::embeddings::embedder_from_config;
use supportdesk::learning::{ConversationIndexer, LearningService};
use supportdesk::llm::{fallback_provider_from_config, provider_from_config, FallbackChain};
use supportdesk::notifications::{EmailNotifier, EscalationNotifier, PresenceRegistry};
use supportdesk::queue::{RetryPolicy, TaskRouter, TokioTaskQueue};
use supportdesk::rag::{RagService, SqlHydration};
use supportdesk::session::PgSessionStore;
use supportdesk::shared::cache::{CacheStore, MemoryCache, RedisCache};
use supportdesk::shared::state::AppState;
use supportdesk::shared::utils::create_conn;
use supportdesk::vectordb::{QdrantStore, VectorStore};
use supportdesk::webhooks::{DeliveryWorker, PgWebhookStore, WebhookDispatcher, WebhookStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env();

    let pool = create_conn(&config.database.url).context("database pool")?;
    let sessions = Arc::new(PgSessionStore::new(pool.clone()));
    let webhook_store: Arc<dyn WebhookStore> = Arc::new(PgWebhookStore::new(pool.clone()));

    let vectors: Arc<dyn VectorStore> = Arc::new(QdrantStore::connect(&config.qdrant)?);
    let embedder = embedder_from_config(&config.embeddings)?;

    let cache: Arc<dyn CacheStore> = match &config.redis_url {
        Some(url) => {
            let client = Arc::new(redis::Client::open(url.as_str()).context("redis client")?);
            Arc::new(RedisCache::new(client, "supportdesk"))
        }
        None => Arc::new(MemoryCache::new()),
    };

    let llm = Arc::new(FallbackChain::new(
        provider_from_config(&config.llm)?,
        fallback_provider_from_config(&config.llm)?,
        config.llm.fallback_model.clone(),
        config.llm.request_timeout,
    ));

    let hydration = Arc::new(SqlHydration::new(pool.clone()));
    let rag = Arc::new(RagService::new(
        embedder.clone(),
        vectors.clone(),
        hydration,
        llm,
        config.retrieval.clone(),
    ));
    let learning = Arc::new(LearningService::new(embedder.clone(), vectors.clone()));
    let indexer = Arc::new(ConversationIndexer::new(
        embedder,
        vectors,
        sessions.clone(),
    ));

    let bus = Arc::new(BroadcastBus::new());
    let presence = Arc::new(PresenceRegistry::new());

    let delivery = Arc::new(DeliveryWorker::new(webhook_store.clone(), 3));
    let email = config
        .smtp
        .clone()
        .map(|smtp| Arc::new(EmailNotifier::new(smtp)));
    let router = Arc::new(TaskRouter::new(delivery, email, indexer));
    let queue = Arc::new(TokioTaskQueue::start(router, RetryPolicy::default()));

    let webhooks = Arc::new(WebhookDispatcher::new(webhook_store.clone(), queue.clone()));
    let notifier = Arc::new(EscalationNotifier::new(
        sessions.clone(),
        bus.clone(),
        queue.clone(),
        presence.clone(),
    ));
    let dispatcher = Arc::new(DispatcherService::new(
        sessions.clone(),
        rag,
        bus.clone(),
        webhooks,
        notifier,
        queue.clone(),
        learning,
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState {
        config,
        sessions,
        webhooks: webhook_store,
        bus,
        queue,
        cache,
        presence,
        dispatcher,
    });

    let app = api::configure_routes()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("listening on {addr}");
    axum::serve(listener, app).await.context("server")?;
    Ok(())
}
