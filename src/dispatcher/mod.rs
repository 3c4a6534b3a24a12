//! Top-level turn orchestration: persistence, retrieval, confidence-gated
//! escalation, validation gating, and the event fan-out around each state
//! change. Every broadcast happens after its store write.

use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::broadcast::{events, topics, MessageBus};
use crate::learning::LearningService;
use crate::llm::ChatTurn;
use crate::notifications::EscalationNotifier;
use crate::queue::{Task, TaskQueue};
use crate::rag::{RagOutcome, RagService, RetrievalResult};
use crate::session::{ResolveOutcome, SessionStore, ValidationAction};
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::{
    Agent, EscalationReason, Message, MessageRole, Session, SessionStatus, ValidationStatus,
};
use crate::webhooks::WebhookDispatcher;

#[derive(Debug)]
pub enum ChatOutcome {
    /// Assistant answer persisted. When `pending_validation` the end user has
    /// not seen it yet.
    Answered {
        message: Message,
        pending_validation: bool,
    },
    /// Confidence gate tripped; the turn produced no assistant message.
    Escalated { session: Session },
    /// A human already owns the conversation; the user message was recorded
    /// and relayed, nothing generated.
    AwaitingHuman { session: Session },
    /// Terminal generation failure for this turn.
    Failed { message: Message, error: String },
}

pub struct DispatcherService {
    sessions: Arc<dyn SessionStore>,
    rag: Arc<RagService>,
    bus: Arc<dyn MessageBus>,
    webhooks: Arc<WebhookDispatcher>,
    notifier: Arc<EscalationNotifier>,
    queue: Arc<dyn TaskQueue>,
    learning: Arc<LearningService>,
}

impl DispatcherService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        rag: Arc<RagService>,
        bus: Arc<dyn MessageBus>,
        webhooks: Arc<WebhookDispatcher>,
        notifier: Arc<EscalationNotifier>,
        queue: Arc<dyn TaskQueue>,
        learning: Arc<LearningService>,
    ) -> Self {
        Self {
            sessions,
            rag,
            bus,
            webhooks,
            notifier,
            queue,
            learning,
        }
    }

    pub async fn chat(&self, session_id: Uuid, user_text: &str) -> CoreResult<ChatOutcome> {
        if user_text.trim().is_empty() {
            return Err(CoreError::validation(
                "content",
                "message content must not be empty",
            ));
        }

        let session = self.sessions.get_session(session_id).await?;
        let agent = self.sessions.get_agent(session.agent_id).await?;

        let history = self.history_turns(session.id).await?;

        // The raw user message is persisted and relayed before anything can
        // fail, so human observers always see the conversation as it is.
        let user_message = self
            .sessions
            .append_message(Message::user(session.id, user_text))
            .await?;
        let received = events::message_received(&user_message);
        self.bus
            .publish(&topics::chat_session(session.public_id), received.clone())
            .await;
        self.bus
            .publish(&topics::session_private(session.public_id), received)
            .await;

        if session.status() != SessionStatus::Active {
            return Ok(ChatOutcome::AwaitingHuman { session });
        }

        match self.rag.answer(&agent, user_text, &history).await {
            Ok(RagOutcome::Answered {
                generation,
                evidence,
            }) => {
                let validation = if agent.require_validation {
                    ValidationStatus::Pending
                } else {
                    ValidationStatus::NotRequired
                };
                let mut message =
                    Message::assistant(session.id, &generation.content, validation);
                message.model = Some(generation.model.clone());
                message.generation_time_ms = Some(generation.generation_time_ms);
                message.tokens_prompt = Some(generation.tokens_prompt);
                message.tokens_completion = Some(generation.tokens_completion);
                message.rag_sources = Value::Array(
                    evidence.iter().map(RetrievalResult::source_ref).collect(),
                );
                if generation.used_fallback {
                    info!(
                        "fallback answer on session {}: requested {} got {}",
                        session.public_id, generation.requested_model, generation.model
                    );
                }
                let message = self.sessions.append_message(message).await?;

                let completed = events::message_completed(&message);
                if agent.require_validation {
                    // Review channel only; the end user never sees an
                    // unvalidated answer.
                    self.bus
                        .publish(&topics::agent_support(agent.id), completed)
                        .await;
                } else {
                    self.bus
                        .publish(&topics::chat_message(message.id), completed.clone())
                        .await;
                    self.bus
                        .publish(&topics::chat_session(session.public_id), completed)
                        .await;
                }

                Ok(ChatOutcome::Answered {
                    message,
                    pending_validation: agent.require_validation,
                })
            }
            Ok(RagOutcome::NoConfidentAnswer { best_score }) => {
                info!(
                    "low-confidence turn on session {} (best score {:?})",
                    session.public_id, best_score
                );
                let session = self
                    .escalate_inner(session, &agent, EscalationReason::LowConfidence)
                    .await?;
                Ok(ChatOutcome::Escalated { session })
            }
            Err(e) => {
                let error = e.to_string();
                let mut message =
                    Message::assistant(session.id, "", ValidationStatus::NotRequired);
                message.processing_error = Some(error.clone());
                message.retry_count = 1;
                let message = self.sessions.append_message(message).await?;

                let failed = events::message_failed(&message, &error);
                self.bus
                    .publish(&topics::chat_message(message.id), failed.clone())
                    .await;
                self.bus
                    .publish(&topics::chat_session(session.public_id), failed)
                    .await;

                warn!("turn failed on session {}: {error}", session.public_id);
                Ok(ChatOutcome::Failed { message, error })
            }
        }
    }

    /// Explicit escalation triggers from the caller layer: user request, AI
    /// self-reported uncertainty, negative feedback.
    pub async fn escalate(
        &self,
        session_id: Uuid,
        reason: EscalationReason,
    ) -> CoreResult<Session> {
        let session = self.sessions.get_session(session_id).await?;
        let agent = self.sessions.get_agent(session.agent_id).await?;
        self.escalate_inner(session, &agent, reason).await
    }

    async fn escalate_inner(
        &self,
        session: Session,
        agent: &Agent,
        reason: EscalationReason,
    ) -> CoreResult<Session> {
        let session = self.sessions.escalate(session.id, reason).await?;

        let payload = events::session_escalated(&session, agent);
        self.bus
            .publish(&topics::agent_support(agent.id), payload.clone())
            .await;
        self.bus
            .publish(&topics::admin_escalations(), payload.clone())
            .await;
        self.bus
            .publish(&topics::chat_session(session.public_id), payload.clone())
            .await;

        // Fan-out failures are logged, never surfaced to the end user.
        if let Err(e) = self
            .notifier
            .notify_escalation(&session, agent, &payload)
            .await
        {
            warn!("escalation notification failed: {e}");
        }
        if let Err(e) = self
            .webhooks
            .dispatch(
                agent.owner_user_id,
                "session.escalated",
                &payload,
                Some(&session),
            )
            .await
        {
            warn!("escalation webhook dispatch failed: {e}");
        }

        Ok(session)
    }

    /// Atomic claim; of two concurrent calls exactly one wins.
    pub async fn claim(&self, session_id: Uuid, support_agent: Uuid) -> CoreResult<Session> {
        let session = self.sessions.claim(session_id, support_agent).await?;
        let name = self
            .support_agent_name(session.agent_id, support_agent)
            .await;

        let payload = events::session_assigned(&session, &name);
        self.bus
            .publish(&topics::agent_support(session.agent_id), payload.clone())
            .await;
        self.bus
            .publish(&topics::chat_session(session.public_id), payload)
            .await;
        Ok(session)
    }

    /// Terminal and idempotent; the duplicate path emits no events.
    pub async fn resolve(
        &self,
        session_id: Uuid,
        resolved_by: Option<Uuid>,
        resolution_type: &str,
    ) -> CoreResult<Session> {
        let outcome = self
            .sessions
            .resolve(session_id, resolved_by, resolution_type)
            .await?;

        let session = match outcome {
            ResolveOutcome::AlreadyResolved(session) => return Ok(session),
            ResolveOutcome::Resolved(session) => session,
        };
        let agent = self.sessions.get_agent(session.agent_id).await?;

        let payload = events::session_resolved(&session);
        self.bus
            .publish(&topics::chat_session(session.public_id), payload.clone())
            .await;
        self.bus
            .publish(&topics::agent_support(agent.id), payload.clone())
            .await;

        if let Err(e) = self
            .webhooks
            .dispatch(
                agent.owner_user_id,
                "session.completed",
                &payload,
                Some(&session),
            )
            .await
        {
            warn!("resolution webhook dispatch failed: {e}");
        }
        if let Err(e) = self
            .queue
            .enqueue(Task::ReindexConversation {
                agent_id: agent.id,
                session_id: session.id,
            })
            .await
        {
            warn!("reindex enqueue failed: {e}");
        }

        Ok(session)
    }

    /// Reviewer decision on a pending assistant message. Approval and
    /// correction deliver to the end user; `learn` additionally records the
    /// question/answer pair as a learned entry.
    pub async fn validate(
        &self,
        message_id: Uuid,
        action: ValidationAction,
        learn: bool,
    ) -> CoreResult<Message> {
        let message = self.sessions.validate_message(message_id, action).await?;
        let session = self.sessions.get_session(message.session_id).await?;

        match message.validation_status() {
            ValidationStatus::Approved | ValidationStatus::Corrected => {
                let payload = events::message_validated(&message);
                self.bus
                    .publish(&topics::chat_message(message.id), payload.clone())
                    .await;
                self.bus
                    .publish(&topics::chat_session(session.public_id), payload)
                    .await;

                if learn {
                    if let Err(e) = self.learn_from(&session, &message).await {
                        warn!("learned-entry recording failed: {e}");
                    }
                }
            }
            // Rejection suppresses delivery; the reviewer replies through a
            // separate channel.
            _ => {}
        }

        Ok(message)
    }

    async fn learn_from(&self, session: &Session, answer: &Message) -> CoreResult<()> {
        let agent = self.sessions.get_agent(session.agent_id).await?;
        let history = self.sessions.session_history(session.id).await?;
        let question = history
            .iter()
            .filter(|m| m.role() == MessageRole::User && m.created_at < answer.created_at)
            .next_back()
            .ok_or(CoreError::NotFound("originating user message"))?;

        self.learning
            .record(
                &agent,
                answer.id,
                &question.content,
                answer.delivered_content(),
            )
            .await?;
        Ok(())
    }

    async fn history_turns(&self, session_id: Uuid) -> CoreResult<Vec<ChatTurn>> {
        let messages = self.sessions.session_history(session_id).await?;
        Ok(prompt_turns(messages.iter()))
    }

    /// Re-drives generation for a failed assistant message. The attempt lands
    /// on the same row: success clears `processing_error`, another failure
    /// bumps `retry_count`. No new message is appended either way.
    pub async fn retry_message(&self, message_id: Uuid) -> CoreResult<ChatOutcome> {
        let mut message = self.sessions.get_message(message_id).await?;
        if message.role() != MessageRole::Assistant || message.processing_error.is_none() {
            return Err(CoreError::InvalidTransition(
                "only failed assistant messages can be retried".to_string(),
            ));
        }
        let session = self.sessions.get_session(message.session_id).await?;
        if session.status() != SessionStatus::Active {
            return Ok(ChatOutcome::AwaitingHuman { session });
        }
        let agent = self.sessions.get_agent(session.agent_id).await?;

        let history = self.sessions.session_history(session.id).await?;
        let question = history
            .iter()
            .filter(|m| m.role() == MessageRole::User && m.created_at < message.created_at)
            .next_back()
            .ok_or(CoreError::NotFound("originating user message"))?
            .clone();
        let turns = prompt_turns(history.iter().filter(|m| m.created_at < question.created_at));

        match self.rag.answer(&agent, &question.content, &turns).await {
            Ok(RagOutcome::Answered {
                generation,
                evidence,
            }) => {
                message.content = generation.content.clone();
                message.model = Some(generation.model.clone());
                message.generation_time_ms = Some(generation.generation_time_ms);
                message.tokens_prompt = Some(generation.tokens_prompt);
                message.tokens_completion = Some(generation.tokens_completion);
                message.rag_sources =
                    Value::Array(evidence.iter().map(RetrievalResult::source_ref).collect());
                message.processing_error = None;
                let validation = if agent.require_validation {
                    ValidationStatus::Pending
                } else {
                    ValidationStatus::NotRequired
                };
                message.validation_status = validation.as_str().to_string();
                self.sessions.update_message(&message).await?;

                let completed = events::message_completed(&message);
                if agent.require_validation {
                    self.bus
                        .publish(&topics::agent_support(agent.id), completed)
                        .await;
                } else {
                    self.bus
                        .publish(&topics::chat_message(message.id), completed.clone())
                        .await;
                    self.bus
                        .publish(&topics::chat_session(session.public_id), completed)
                        .await;
                }

                Ok(ChatOutcome::Answered {
                    message,
                    pending_validation: agent.require_validation,
                })
            }
            Ok(RagOutcome::NoConfidentAnswer { best_score }) => {
                info!(
                    "low-confidence retry on session {} (best score {:?})",
                    session.public_id, best_score
                );
                let session = self
                    .escalate_inner(session, &agent, EscalationReason::LowConfidence)
                    .await?;
                Ok(ChatOutcome::Escalated { session })
            }
            Err(e) => {
                let error = e.to_string();
                message.retry_count += 1;
                message.processing_error = Some(error.clone());
                self.sessions.update_message(&message).await?;

                let failed = events::message_failed(&message, &error);
                self.bus
                    .publish(&topics::chat_message(message.id), failed.clone())
                    .await;
                self.bus
                    .publish(&topics::chat_session(session.public_id), failed)
                    .await;

                warn!("retry failed on session {}: {error}", session.public_id);
                Ok(ChatOutcome::Failed { message, error })
            }
        }
    }

    async fn support_agent_name(&self, agent_id: Uuid, support_agent: Uuid) -> String {
        let mut candidates = self
            .sessions
            .support_users_for_agent(agent_id)
            .await
            .unwrap_or_default();
        if let Ok(admins) = self.sessions.super_admins().await {
            candidates.extend(admins);
        }
        candidates
            .into_iter()
            .find(|u| u.id == support_agent)
            .map(|u| u.name)
            .unwrap_or_else(|| "support agent".to_string())
    }
}

/// Conversation context handed to retrieval. Rejected answers and failed
/// placeholder rows never re-enter a prompt.
fn prompt_turns<'a>(messages: impl Iterator<Item = &'a Message>) -> Vec<ChatTurn> {
    messages
        .filter(|m| m.validation_status() != ValidationStatus::Rejected)
        .filter(|m| m.processing_error.is_none())
        .filter_map(|m| {
            let role = MessageRole::parse(&m.role)?;
            Some(ChatTurn {
                role,
                content: m.delivered_content().to_string(),
            })
        })
        .collect()
}
