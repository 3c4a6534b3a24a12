use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::{
    agents, chat_messages, chat_sessions, delivery_attempts, support_users, webhook_subscriptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Escalated,
    Assigned,
    Resolved,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Escalated => "escalated",
            Self::Assigned => "assigned",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "escalated" => Some(Self::Escalated),
            "assigned" => Some(Self::Assigned),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Escalated => 1,
            Self::Assigned => 2,
            Self::Resolved => 3,
        }
    }

    /// Transitions only move forward; `resolved` is terminal.
    pub fn can_advance_to(&self, next: SessionStatus) -> bool {
        next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    None,
    LowConfidence,
    UserRequest,
    AiUncertainty,
    NegativeFeedback,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LowConfidence => "low_confidence",
            Self::UserRequest => "user_request",
            Self::AiUncertainty => "ai_uncertainty",
            Self::NegativeFeedback => "negative_feedback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "low_confidence" => Some(Self::LowConfidence),
            "user_request" => Some(Self::UserRequest),
            "ai_uncertainty" => Some(Self::AiUncertainty),
            "negative_feedback" => Some(Self::NegativeFeedback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    NotRequired,
    Pending,
    Approved,
    Corrected,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Corrected => "corrected",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_required" => Some(Self::NotRequired),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "corrected" => Some(Self::Corrected),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Only pending messages accept a review outcome, and each outcome is
    /// terminal for the message.
    pub fn can_become(&self, next: ValidationStatus) -> bool {
        matches!(self, Self::Pending)
            && matches!(next, Self::Approved | Self::Corrected | Self::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    TextOnly,
    SqlHydration,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextOnly => "text_only",
            Self::SqlHydration => "sql_hydration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text_only" => Some(Self::TextOnly),
            "sql_hydration" => Some(Self::SqlHydration),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Tenant-scoped persona. Immutable for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = agents)]
pub struct Agent {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub name: String,
    pub system_instructions: String,
    pub model: String,
    pub fallback_model: Option<String>,
    pub temperature: f64,
    pub max_tokens: i32,
    pub retrieval_mode: String,
    pub general_collection: String,
    pub learned_collection: String,
    pub min_score: f64,
    pub learned_min_score: f64,
    pub require_validation: bool,
    pub answer_below_threshold: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn retrieval_mode(&self) -> RetrievalMode {
        RetrievalMode::parse(&self.retrieval_mode).unwrap_or(RetrievalMode::TextOnly)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = chat_sessions)]
pub struct Session {
    pub id: Uuid,
    pub public_id: Uuid,
    pub agent_id: Uuid,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub status: String,
    pub escalation_reason: String,
    pub assigned_support_agent: Option<Uuid>,
    pub message_count: i32,
    pub started_at: DateTime<Utc>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolution_type: Option<String>,
}

impl Session {
    pub fn new(agent_id: Uuid, user_name: Option<String>, user_email: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            public_id: Uuid::new_v4(),
            agent_id,
            user_name,
            user_email,
            status: SessionStatus::Active.as_str().to_string(),
            escalation_reason: EscalationReason::None.as_str().to_string(),
            assigned_support_agent: None,
            message_count: 0,
            started_at: now,
            escalated_at: None,
            assigned_at: None,
            resolved_at: None,
            resolved_by: None,
            resolution_type: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::parse(&self.status).unwrap_or(SessionStatus::Active)
    }

    pub fn escalation_reason(&self) -> EscalationReason {
        EscalationReason::parse(&self.escalation_reason).unwrap_or(EscalationReason::None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = chat_messages)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    pub corrected_content: Option<String>,
    pub validation_status: String,
    pub retry_count: i32,
    pub processing_error: Option<String>,
    pub rag_sources: serde_json::Value,
    pub model: Option<String>,
    pub generation_time_ms: Option<i64>,
    pub tokens_prompt: Option<i32>,
    pub tokens_completion: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn user(session_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(
            session_id,
            MessageRole::User,
            content,
            ValidationStatus::NotRequired,
        )
    }

    pub fn assistant(
        session_id: Uuid,
        content: impl Into<String>,
        validation: ValidationStatus,
    ) -> Self {
        Self::new(session_id, MessageRole::Assistant, content, validation)
    }

    fn new(
        session_id: Uuid,
        role: MessageRole,
        content: impl Into<String>,
        validation: ValidationStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: role.as_str().to_string(),
            content: content.into(),
            corrected_content: None,
            validation_status: validation.as_str().to_string(),
            retry_count: 0,
            processing_error: None,
            rag_sources: serde_json::Value::Array(vec![]),
            model: None,
            generation_time_ms: None,
            tokens_prompt: None,
            tokens_completion: None,
            created_at: Utc::now(),
            validated_at: None,
        }
    }

    pub fn role(&self) -> MessageRole {
        MessageRole::parse(&self.role).unwrap_or(MessageRole::User)
    }

    pub fn validation_status(&self) -> ValidationStatus {
        ValidationStatus::parse(&self.validation_status).unwrap_or(ValidationStatus::NotRequired)
    }

    /// Content as the end user should see it: a correction supersedes the
    /// generated text.
    pub fn delivered_content(&self) -> &str {
        self.corrected_content.as_deref().unwrap_or(&self.content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = support_users)]
pub struct SupportUser {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub name: String,
    pub email: String,
    pub receives_escalations: bool,
    pub is_super_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = webhook_subscriptions)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn matches(&self, event: &str) -> bool {
        self.is_active && self.events.iter().any(|e| e == event || e == "*")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = delivery_attempts)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempt: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
