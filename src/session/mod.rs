use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::{
    Agent, EscalationReason, Message, Session, SessionStatus, SupportUser, ValidationStatus,
};

pub mod memory;
pub mod pg;

pub use memory::MemorySessionStore;
pub use pg::PgSessionStore;

/// Reviewer decision on a pending assistant message.
#[derive(Debug, Clone)]
pub enum ValidationAction {
    Approve,
    Correct { corrected_content: String },
    Reject,
}

impl ValidationAction {
    pub fn target_status(&self) -> ValidationStatus {
        match self {
            Self::Approve => ValidationStatus::Approved,
            Self::Correct { .. } => ValidationStatus::Corrected,
            Self::Reject => ValidationStatus::Rejected,
        }
    }
}

/// Duplicate resolve actions are safe; callers can tell whether this call
/// performed the transition or hit the terminal state.
#[derive(Debug)]
pub enum ResolveOutcome {
    Resolved(Session),
    AlreadyResolved(Session),
}

impl ResolveOutcome {
    pub fn session(&self) -> &Session {
        match self {
            Self::Resolved(s) | Self::AlreadyResolved(s) => s,
        }
    }
}

/// Persistence seam for conversation state. `PgSessionStore` backs
/// production; `MemorySessionStore` backs tests and single-node dev.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_agent(&self, agent: Agent) -> CoreResult<Agent>;
    async fn get_agent(&self, id: Uuid) -> CoreResult<Agent>;

    async fn create_session(&self, session: Session) -> CoreResult<Session>;
    async fn get_session(&self, id: Uuid) -> CoreResult<Session>;

    /// Appends a message and bumps the owning session's message count.
    async fn append_message(&self, message: Message) -> CoreResult<Message>;
    async fn get_message(&self, id: Uuid) -> CoreResult<Message>;
    async fn update_message(&self, message: &Message) -> CoreResult<()>;
    async fn session_history(&self, session_id: Uuid) -> CoreResult<Vec<Message>>;

    /// active -> escalated, recording the reason exactly once.
    async fn escalate(&self, session_id: Uuid, reason: EscalationReason) -> CoreResult<Session>;

    /// escalated -> assigned under compare-and-set: of two concurrent claims
    /// exactly one wins; the loser gets [`CoreError::AssignmentConflict`].
    async fn claim(&self, session_id: Uuid, support_agent: Uuid) -> CoreResult<Session>;

    /// -> resolved; terminal and idempotent.
    async fn resolve(
        &self,
        session_id: Uuid,
        resolved_by: Option<Uuid>,
        resolution_type: &str,
    ) -> CoreResult<ResolveOutcome>;

    /// pending -> {approved, corrected, rejected}, rejected once the owning
    /// session is resolved.
    async fn validate_message(
        &self,
        message_id: Uuid,
        action: ValidationAction,
    ) -> CoreResult<Message>;

    async fn support_users_for_agent(&self, agent_id: Uuid) -> CoreResult<Vec<SupportUser>>;
    async fn super_admins(&self) -> CoreResult<Vec<SupportUser>>;
    async fn insert_support_user(&self, user: SupportUser) -> CoreResult<SupportUser>;
}

/// Shared transition checks, used by both store implementations so the state
/// machine cannot drift between backends.
pub(crate) fn apply_escalation(
    session: &mut Session,
    reason: EscalationReason,
) -> CoreResult<()> {
    let current = session.status();
    if current != SessionStatus::Active {
        return Err(CoreError::InvalidTransition(format!(
            "cannot escalate a session in status `{}`",
            session.status
        )));
    }
    session.status = SessionStatus::Escalated.as_str().to_string();
    session.escalation_reason = reason.as_str().to_string();
    session.escalated_at = Some(Utc::now());
    Ok(())
}

pub(crate) fn apply_validation(
    session: &Session,
    message: &mut Message,
    action: &ValidationAction,
) -> CoreResult<()> {
    if session.status() == SessionStatus::Resolved {
        return Err(CoreError::InvalidTransition(
            "cannot validate a message in a resolved session".to_string(),
        ));
    }
    let current = message.validation_status();
    let target = action.target_status();
    if !current.can_become(target) {
        return Err(CoreError::InvalidTransition(format!(
            "validation cannot move {} -> {}",
            current.as_str(),
            target.as_str()
        )));
    }
    if let ValidationAction::Correct { corrected_content } = action {
        message.corrected_content = Some(corrected_content.clone());
    }
    message.validation_status = target.as_str().to_string();
    message.validated_at = Some(Utc::now());
    Ok(())
}
