use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    apply_escalation, apply_validation, ResolveOutcome, SessionStore, ValidationAction,
};
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::{Agent, EscalationReason, Message, Session, SessionStatus, SupportUser};

#[derive(Default)]
struct Inner {
    agents: HashMap<Uuid, Agent>,
    sessions: HashMap<Uuid, Session>,
    messages: HashMap<Uuid, Message>,
    support_users: Vec<SupportUser>,
}

/// In-process store. The single mutex gives the same claim atomicity the
/// conditional UPDATE provides in Postgres.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_agent(&self, agent: Agent) -> CoreResult<Agent> {
        self.inner.lock().await.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, id: Uuid) -> CoreResult<Agent> {
        self.inner
            .lock()
            .await
            .agents
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("agent"))
    }

    async fn create_session(&self, session: Session) -> CoreResult<Session> {
        self.inner
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> CoreResult<Session> {
        self.inner
            .lock()
            .await
            .sessions
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("session"))
    }

    async fn append_message(&self, message: Message) -> CoreResult<Message> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(&message.session_id)
            .ok_or(CoreError::NotFound("session"))?;
        session.message_count += 1;
        inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> CoreResult<Message> {
        self.inner
            .lock()
            .await
            .messages
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("message"))
    }

    async fn update_message(&self, message: &Message) -> CoreResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.messages.contains_key(&message.id) {
            return Err(CoreError::NotFound("message"));
        }
        inner.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn session_history(&self, session_id: Uuid) -> CoreResult<Vec<Message>> {
        let inner = self.inner.lock().await;
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn escalate(&self, session_id: Uuid, reason: EscalationReason) -> CoreResult<Session> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(CoreError::NotFound("session"))?;
        apply_escalation(session, reason)?;
        Ok(session.clone())
    }

    async fn claim(&self, session_id: Uuid, support_agent: Uuid) -> CoreResult<Session> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(CoreError::NotFound("session"))?;

        if session.status() != SessionStatus::Escalated
            || session.assigned_support_agent.is_some()
        {
            return Err(CoreError::AssignmentConflict);
        }

        session.status = SessionStatus::Assigned.as_str().to_string();
        session.assigned_support_agent = Some(support_agent);
        session.assigned_at = Some(Utc::now());
        Ok(session.clone())
    }

    async fn resolve(
        &self,
        session_id: Uuid,
        resolved_by: Option<Uuid>,
        resolution_type: &str,
    ) -> CoreResult<ResolveOutcome> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(CoreError::NotFound("session"))?;

        if session.status() == SessionStatus::Resolved {
            return Ok(ResolveOutcome::AlreadyResolved(session.clone()));
        }

        session.status = SessionStatus::Resolved.as_str().to_string();
        session.escalation_reason = EscalationReason::None.as_str().to_string();
        session.resolved_at = Some(Utc::now());
        session.resolved_by = resolved_by;
        session.resolution_type = Some(resolution_type.to_string());
        Ok(ResolveOutcome::Resolved(session.clone()))
    }

    async fn validate_message(
        &self,
        message_id: Uuid,
        action: ValidationAction,
    ) -> CoreResult<Message> {
        let mut inner = self.inner.lock().await;
        let Some(message) = inner.messages.get(&message_id).cloned() else {
            return Err(CoreError::NotFound("message"));
        };
        let session = inner
            .sessions
            .get(&message.session_id)
            .cloned()
            .ok_or(CoreError::NotFound("session"))?;

        let mut message = message;
        apply_validation(&session, &mut message, &action)?;
        inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn support_users_for_agent(&self, agent_id: Uuid) -> CoreResult<Vec<SupportUser>> {
        Ok(self
            .inner
            .lock()
            .await
            .support_users
            .iter()
            .filter(|u| u.agent_id == agent_id && u.is_active)
            .cloned()
            .collect())
    }

    async fn super_admins(&self) -> CoreResult<Vec<SupportUser>> {
        Ok(self
            .inner
            .lock()
            .await
            .support_users
            .iter()
            .filter(|u| u.is_super_admin && u.is_active)
            .cloned()
            .collect())
    }

    async fn insert_support_user(&self, user: SupportUser) -> CoreResult<SupportUser> {
        self.inner.lock().await.support_users.push(user.clone());
        Ok(user)
    }
}
