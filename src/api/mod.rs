use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::dispatcher::ChatOutcome;
use crate::session::{SessionStore, ValidationAction};
use crate::shared::cache::CacheStore;
use crate::shared::errors::CoreError;
use crate::shared::models::{EscalationReason, Message, Session, WebhookSubscription};
use crate::shared::state::AppState;
use crate::webhooks::WebhookStore;

pub mod ws;

pub fn configure_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/chat/sessions", post(create_session))
        .route("/api/chat/sessions/:id", get(get_session))
        .route("/api/chat/sessions/:id/messages", post(post_message))
        .route("/api/chat/sessions/:id/escalate", put(escalate_session))
        .route("/api/chat/sessions/:id/claim", put(claim_session))
        .route("/api/chat/sessions/:id/resolve", put(resolve_session))
        .route("/api/chat/messages/:id/retry", post(retry_message))
        .route("/api/chat/messages/:id/validate", post(validate_message))
        .route("/api/agents/:id/display", get(agent_display))
        .route(
            "/api/webhooks",
            get(list_subscriptions).post(create_subscription),
        )
        .route("/ws", get(ws::ws_handler))
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    agent_id: Uuid,
    user_name: Option<String>,
    user_email: Option<String>,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<Session>, (StatusCode, String)> {
    // Fails fast when the agent does not exist.
    state.sessions.get_agent(body.agent_id).await?;
    let session = state
        .sessions
        .create_session(Session::new(body.agent_id, body.user_name, body.user_email))
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Serialize)]
struct SessionView {
    session: Session,
    messages: Vec<Message>,
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let session = state.sessions.get_session(id).await?;
    let messages = state.sessions.session_history(id).await?;
    Ok(Json(SessionView { session, messages }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    content: String,
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let outcome = state.dispatcher.chat(id, &body.content).await?;
    Ok(Json(outcome_body(outcome)))
}

async fn retry_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let outcome = state.dispatcher.retry_message(id).await?;
    Ok(Json(outcome_body(outcome)))
}

fn outcome_body(outcome: ChatOutcome) -> Value {
    match outcome {
        ChatOutcome::Answered {
            message,
            pending_validation,
        } => json!({
            "outcome": "answered",
            "pending_validation": pending_validation,
            "message": message,
        }),
        ChatOutcome::Escalated { session } => json!({
            "outcome": "escalated",
            "session": session,
        }),
        ChatOutcome::AwaitingHuman { session } => json!({
            "outcome": "awaiting_human",
            "session": session,
        }),
        ChatOutcome::Failed { message, error } => json!({
            "outcome": "failed",
            "error": error,
            "can_retry": true,
            "message": message,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct EscalateRequest {
    reason: String,
}

async fn escalate_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<EscalateRequest>,
) -> Result<Json<Session>, (StatusCode, String)> {
    let reason = EscalationReason::parse(&body.reason).ok_or_else(|| {
        CoreError::validation(
            "reason",
            format!("unknown escalation reason `{}`", body.reason),
        )
    })?;
    let session = state.dispatcher.escalate(id, reason).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    support_agent_id: Uuid,
}

async fn claim_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ClaimRequest>,
) -> Result<Json<Session>, (StatusCode, String)> {
    let session = state.dispatcher.claim(id, body.support_agent_id).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    resolved_by: Option<Uuid>,
    resolution_type: String,
}

async fn resolve_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<Session>, (StatusCode, String)> {
    let session = state
        .dispatcher
        .resolve(id, body.resolved_by, &body.resolution_type)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    action: String,
    corrected_content: Option<String>,
    #[serde(default)]
    learn: bool,
}

async fn validate_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<Message>, (StatusCode, String)> {
    let action = match body.action.as_str() {
        "approve" => ValidationAction::Approve,
        "correct" => {
            let corrected_content = body.corrected_content.ok_or_else(|| {
                CoreError::validation(
                    "corrected_content",
                    "correction requires corrected_content",
                )
            })?;
            ValidationAction::Correct { corrected_content }
        }
        "reject" => ValidationAction::Reject,
        other => {
            return Err(CoreError::validation(
                "action",
                format!("unknown validation action `{other}`"),
            )
            .into())
        }
    };
    let message = state.dispatcher.validate(id, action, body.learn).await?;
    Ok(Json(message))
}

/// Public-facing widget configuration, cached per agent.
async fn agent_display(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let scope = id.to_string();
    if let Some(cached) = state.cache.get(&scope, "display").await {
        return Ok(Json(cached));
    }
    let agent = state.sessions.get_agent(id).await?;
    let display = json!({
        "agent_id": agent.id,
        "name": agent.name,
        "is_active": agent.is_active,
        "answers_are_reviewed": agent.require_validation,
    });
    state
        .cache
        .put(&scope, "display", display.clone(), Duration::from_secs(300))
        .await;
    Ok(Json(display))
}

#[derive(Debug, Deserialize)]
struct CreateSubscriptionRequest {
    owner_user_id: Uuid,
    url: String,
    events: Vec<String>,
}

async fn create_subscription(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<Json<WebhookSubscription>, (StatusCode, String)> {
    if !body.url.starts_with("http://") && !body.url.starts_with("https://") {
        return Err(CoreError::validation("url", "webhook url must be http(s)").into());
    }
    if body.events.is_empty() {
        return Err(CoreError::validation("events", "subscribe to at least one event").into());
    }
    let subscription = state
        .webhooks
        .insert_subscription(WebhookSubscription {
            id: Uuid::new_v4(),
            owner_user_id: body.owner_user_id,
            url: body.url,
            events: body.events,
            is_active: true,
            created_at: Utc::now(),
        })
        .await?;
    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
struct OwnerQuery {
    owner_user_id: Uuid,
}

async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<WebhookSubscription>>, (StatusCode, String)> {
    let subscriptions = state
        .webhooks
        .subscriptions_for_owner(query.owner_user_id)
        .await?;
    Ok(Json(subscriptions))
}
