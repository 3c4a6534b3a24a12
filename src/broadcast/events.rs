//! Canonical event payload builders. The field sets here are the
//! compatibility contract with every subscribed client; extend but never
//! rename.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::shared::models::{Agent, Message, Session};

pub fn message_received(message: &Message) -> Value {
    json!({
        "message_id": message.id.to_string(),
        "session_id": message.session_id.to_string(),
        "role": message.role,
        "content": message.content,
        "created_at": message.created_at.to_rfc3339(),
    })
}

pub fn message_completed(message: &Message) -> Value {
    json!({
        "message_id": message.id.to_string(),
        "status": "completed",
        "content": message.content,
        "model": message.model,
        "generation_time_ms": message.generation_time_ms,
        "tokens_prompt": message.tokens_prompt,
        "tokens_completion": message.tokens_completion,
        "created_at": message.created_at.to_rfc3339(),
    })
}

pub fn message_failed(message: &Message, error: &str) -> Value {
    json!({
        "message_id": message.id.to_string(),
        "status": "failed",
        "error": error,
        "can_retry": true,
        "retry_count": message.retry_count,
    })
}

pub fn message_validated(message: &Message) -> Value {
    json!({
        "message_id": message.id.to_string(),
        "content": message.delivered_content(),
        "model": message.model,
        "created_at": message.created_at.to_rfc3339(),
        "validated_at": message.validated_at.map(|t| t.to_rfc3339()),
    })
}

pub fn presence_changed(user_id: Uuid, online: bool) -> Value {
    json!({
        "user_id": user_id.to_string(),
        "online": online,
        "changed_at": Utc::now().to_rfc3339(),
    })
}

pub fn session_escalated(session: &Session, agent: &Agent) -> Value {
    json!({
        "session_id": session.id.to_string(),
        "session_uuid": session.public_id.to_string(),
        "agent_id": agent.id.to_string(),
        "agent_name": agent.name,
        "user_name": session.user_name,
        "user_email": session.user_email,
        "escalation_reason": session.escalation_reason,
        "escalated_at": session.escalated_at.map(|t| t.to_rfc3339()),
        "message_count": session.message_count,
    })
}

pub fn session_assigned(session: &Session, support_agent_name: &str) -> Value {
    json!({
        "session_id": session.id.to_string(),
        "session_uuid": session.public_id.to_string(),
        "support_agent": {
            "id": session.assigned_support_agent.map(|id| id.to_string()),
            "name": support_agent_name,
        },
        "assigned_at": session.assigned_at.map(|t| t.to_rfc3339()),
    })
}

pub fn session_resolved(session: &Session) -> Value {
    json!({
        "session_id": session.id.to_string(),
        "session_uuid": session.public_id.to_string(),
        "resolution_type": session.resolution_type,
        "resolved_at": session.resolved_at.map(|t| t.to_rfc3339()),
        "resolved_by": session.resolved_by.map(|id| id.to_string()),
    })
}
