//! Topic name builders for the broadcast channel topology. The literal
//! shapes are a compatibility contract with subscribed clients.

use uuid::Uuid;

/// Public: single-message completion/failure.
pub fn chat_message(message_id: Uuid) -> String {
    format!("chat.message.{message_id}")
}

/// Public: user messages, validated answers, session lifecycle.
pub fn chat_session(session_public_id: Uuid) -> String {
    format!("chat.session.{session_public_id}")
}

/// Private, dual-party: the raw bidirectional chat stream.
pub fn session_private(session_public_id: Uuid) -> String {
    format!("session.{session_public_id}")
}

/// Private: personal notifications.
pub fn user(user_id: Uuid) -> String {
    format!("user.{user_id}")
}

/// Private: escalation/assignment/resolution for the support team.
pub fn agent_support(agent_id: Uuid) -> String {
    format!("agent.{agent_id}.support")
}

/// Presence: which support agents are currently online.
pub fn presence_agent_support(agent_id: Uuid) -> String {
    format!("presence-agent.{agent_id}.support")
}

/// Global: every escalation, for administrator dashboards.
pub fn admin_escalations() -> String {
    "admin.escalations".to_string()
}
