use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use super::{
    apply_validation, ResolveOutcome, SessionStore, ValidationAction,
};
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::{Agent, EscalationReason, Message, Session, SessionStatus, SupportUser};
use crate::shared::schema::{agents, chat_messages, chat_sessions, support_users};
use crate::shared::utils::DbPool;

/// Postgres-backed store. The claim path relies on a conditional UPDATE so
/// concurrent claims resolve in the database, not in process memory.
pub struct PgSessionStore {
    pool: DbPool,
}

impl PgSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn blocking<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CoreError::Other(anyhow::anyhow!("blocking task panicked: {e}")))?
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert_agent(&self, agent: Agent) -> CoreResult<Agent> {
        self.blocking(move |conn| {
            diesel::insert_into(agents::table)
                .values(&agent)
                .execute(conn)?;
            Ok(agent)
        })
        .await
    }

    async fn get_agent(&self, id: Uuid) -> CoreResult<Agent> {
        self.blocking(move |conn| {
            agents::table
                .filter(agents::id.eq(id))
                .first::<Agent>(conn)
                .optional()?
                .ok_or(CoreError::NotFound("agent"))
        })
        .await
    }

    async fn create_session(&self, session: Session) -> CoreResult<Session> {
        self.blocking(move |conn| {
            diesel::insert_into(chat_sessions::table)
                .values(&session)
                .execute(conn)?;
            Ok(session)
        })
        .await
    }

    async fn get_session(&self, id: Uuid) -> CoreResult<Session> {
        self.blocking(move |conn| {
            chat_sessions::table
                .filter(chat_sessions::id.eq(id))
                .first::<Session>(conn)
                .optional()?
                .ok_or(CoreError::NotFound("session"))
        })
        .await
    }

    async fn append_message(&self, message: Message) -> CoreResult<Message> {
        self.blocking(move |conn| {
            conn.transaction(|conn| {
                diesel::insert_into(chat_messages::table)
                    .values(&message)
                    .execute(conn)?;
                diesel::update(
                    chat_sessions::table.filter(chat_sessions::id.eq(message.session_id)),
                )
                .set(chat_sessions::message_count.eq(chat_sessions::message_count + 1))
                .execute(conn)?;
                Ok::<_, diesel::result::Error>(())
            })?;
            Ok(message)
        })
        .await
    }

    async fn get_message(&self, id: Uuid) -> CoreResult<Message> {
        self.blocking(move |conn| {
            chat_messages::table
                .filter(chat_messages::id.eq(id))
                .first::<Message>(conn)
                .optional()?
                .ok_or(CoreError::NotFound("message"))
        })
        .await
    }

    async fn update_message(&self, message: &Message) -> CoreResult<()> {
        let message = message.clone();
        self.blocking(move |conn| {
            diesel::update(chat_messages::table.filter(chat_messages::id.eq(message.id)))
                .set(&message)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn session_history(&self, session_id: Uuid) -> CoreResult<Vec<Message>> {
        self.blocking(move |conn| {
            Ok(chat_messages::table
                .filter(chat_messages::session_id.eq(session_id))
                .order(chat_messages::created_at.asc())
                .load::<Message>(conn)?)
        })
        .await
    }

    async fn escalate(&self, session_id: Uuid, reason: EscalationReason) -> CoreResult<Session> {
        self.blocking(move |conn| {
            let updated = diesel::update(
                chat_sessions::table
                    .filter(chat_sessions::id.eq(session_id))
                    .filter(chat_sessions::status.eq(SessionStatus::Active.as_str())),
            )
            .set((
                chat_sessions::status.eq(SessionStatus::Escalated.as_str()),
                chat_sessions::escalation_reason.eq(reason.as_str()),
                chat_sessions::escalated_at.eq(Some(Utc::now())),
            ))
            .execute(conn)?;

            if updated == 0 {
                let existing = chat_sessions::table
                    .filter(chat_sessions::id.eq(session_id))
                    .first::<Session>(conn)
                    .optional()?;
                return match existing {
                    Some(session) => Err(CoreError::InvalidTransition(format!(
                        "cannot escalate a session in status `{}`",
                        session.status
                    ))),
                    None => Err(CoreError::NotFound("session")),
                };
            }

            Ok(chat_sessions::table
                .filter(chat_sessions::id.eq(session_id))
                .first::<Session>(conn)?)
        })
        .await
    }

    async fn claim(&self, session_id: Uuid, support_agent: Uuid) -> CoreResult<Session> {
        self.blocking(move |conn| {
            // Compare-and-set: the row must still be escalated and unclaimed.
            let updated = diesel::update(
                chat_sessions::table
                    .filter(chat_sessions::id.eq(session_id))
                    .filter(chat_sessions::status.eq(SessionStatus::Escalated.as_str()))
                    .filter(chat_sessions::assigned_support_agent.is_null()),
            )
            .set((
                chat_sessions::status.eq(SessionStatus::Assigned.as_str()),
                chat_sessions::assigned_support_agent.eq(Some(support_agent)),
                chat_sessions::assigned_at.eq(Some(Utc::now())),
            ))
            .execute(conn)?;

            if updated == 0 {
                let exists = chat_sessions::table
                    .filter(chat_sessions::id.eq(session_id))
                    .count()
                    .get_result::<i64>(conn)?;
                return if exists == 0 {
                    Err(CoreError::NotFound("session"))
                } else {
                    Err(CoreError::AssignmentConflict)
                };
            }

            Ok(chat_sessions::table
                .filter(chat_sessions::id.eq(session_id))
                .first::<Session>(conn)?)
        })
        .await
    }

    async fn resolve(
        &self,
        session_id: Uuid,
        resolved_by: Option<Uuid>,
        resolution_type: &str,
    ) -> CoreResult<ResolveOutcome> {
        let resolution_type = resolution_type.to_string();
        self.blocking(move |conn| {
            let updated = diesel::update(
                chat_sessions::table
                    .filter(chat_sessions::id.eq(session_id))
                    .filter(chat_sessions::status.ne(SessionStatus::Resolved.as_str())),
            )
            .set((
                chat_sessions::status.eq(SessionStatus::Resolved.as_str()),
                chat_sessions::escalation_reason.eq(EscalationReason::None.as_str()),
                chat_sessions::resolved_at.eq(Some(Utc::now())),
                chat_sessions::resolved_by.eq(resolved_by),
                chat_sessions::resolution_type.eq(Some(resolution_type)),
            ))
            .execute(conn)?;

            let session = chat_sessions::table
                .filter(chat_sessions::id.eq(session_id))
                .first::<Session>(conn)
                .optional()?
                .ok_or(CoreError::NotFound("session"))?;

            if updated == 0 {
                Ok(ResolveOutcome::AlreadyResolved(session))
            } else {
                Ok(ResolveOutcome::Resolved(session))
            }
        })
        .await
    }

    async fn validate_message(
        &self,
        message_id: Uuid,
        action: ValidationAction,
    ) -> CoreResult<Message> {
        self.blocking(move |conn| {
            conn.transaction(|conn| {
                let mut message = chat_messages::table
                    .filter(chat_messages::id.eq(message_id))
                    .first::<Message>(conn)
                    .optional()
                    .map_err(CoreError::from)?
                    .ok_or(CoreError::NotFound("message"))?;
                let session = chat_sessions::table
                    .filter(chat_sessions::id.eq(message.session_id))
                    .first::<Session>(conn)
                    .map_err(CoreError::from)?;

                apply_validation(&session, &mut message, &action)?;

                diesel::update(chat_messages::table.filter(chat_messages::id.eq(message.id)))
                    .set(&message)
                    .execute(conn)
                    .map_err(CoreError::from)?;
                Ok::<_, CoreError>(message)
            })
        })
        .await
    }

    async fn support_users_for_agent(&self, agent_id: Uuid) -> CoreResult<Vec<SupportUser>> {
        self.blocking(move |conn| {
            Ok(support_users::table
                .filter(support_users::agent_id.eq(agent_id))
                .filter(support_users::is_active.eq(true))
                .load::<SupportUser>(conn)?)
        })
        .await
    }

    async fn super_admins(&self) -> CoreResult<Vec<SupportUser>> {
        self.blocking(move |conn| {
            Ok(support_users::table
                .filter(support_users::is_super_admin.eq(true))
                .filter(support_users::is_active.eq(true))
                .load::<SupportUser>(conn)?)
        })
        .await
    }

    async fn insert_support_user(&self, user: SupportUser) -> CoreResult<SupportUser> {
        self.blocking(move |conn| {
            diesel::insert_into(support_users::table)
                .values(&user)
                .execute(conn)?;
            Ok(user)
        })
        .await
    }
}
