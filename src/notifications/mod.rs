//! Escalation fan-out to the human support team. Online recipients hear
//! about it on their personal bus topic; offline recipients get an email
//! task queued. Nothing here blocks the chat path.

use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::RwLock;
use uuid::Uuid;

use crate::broadcast::{topics, MessageBus};
use crate::config::SmtpConfig;
use crate::queue::{Task, TaskQueue};
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::{Agent, Session, SupportUser};
use crate::session::SessionStore;

/// Which support users are currently connected. Fed by the websocket layer
/// on connect/disconnect.
#[derive(Default)]
pub struct PresenceRegistry {
    online: RwLock<HashSet<Uuid>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_online(&self, user_id: Uuid) {
        if let Ok(mut online) = self.online.write() {
            online.insert(user_id);
        }
    }

    pub fn mark_offline(&self, user_id: Uuid) {
        if let Ok(mut online) = self.online.write() {
            online.remove(&user_id);
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online
            .read()
            .map(|online| online.contains(&user_id))
            .unwrap_or(false)
    }
}

pub struct EscalationNotifier {
    sessions: Arc<dyn SessionStore>,
    bus: Arc<dyn MessageBus>,
    queue: Arc<dyn TaskQueue>,
    presence: Arc<PresenceRegistry>,
}

impl EscalationNotifier {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        bus: Arc<dyn MessageBus>,
        queue: Arc<dyn TaskQueue>,
        presence: Arc<PresenceRegistry>,
    ) -> Self {
        Self {
            sessions,
            bus,
            queue,
            presence,
        }
    }

    /// Support users flagged for escalation alerts; when nobody is flagged,
    /// everyone registered for the agent. Super-admins always, deduplicated.
    pub async fn recipients(&self, agent_id: Uuid) -> CoreResult<Vec<SupportUser>> {
        let team = self.sessions.support_users_for_agent(agent_id).await?;
        let flagged: Vec<SupportUser> = team
            .iter()
            .filter(|u| u.receives_escalations)
            .cloned()
            .collect();
        let mut recipients = if flagged.is_empty() { team } else { flagged };

        let mut seen: HashSet<Uuid> = recipients.iter().map(|u| u.id).collect();
        for admin in self.sessions.super_admins().await? {
            if seen.insert(admin.id) {
                recipients.push(admin);
            }
        }
        Ok(recipients)
    }

    pub async fn notify_escalation(
        &self,
        session: &Session,
        agent: &Agent,
        payload: &Value,
    ) -> CoreResult<()> {
        let recipients = self.recipients(agent.id).await?;
        info!(
            "escalation fan-out: session={} recipients={}",
            session.public_id,
            recipients.len()
        );

        for recipient in recipients {
            if self.presence.is_online(recipient.id) {
                self.bus
                    .publish(&topics::user(recipient.id), payload.clone())
                    .await;
            } else {
                debug!("recipient {} offline, queueing email", recipient.id);
                self.queue
                    .enqueue(Task::EmailNotification {
                        to: recipient.email.clone(),
                        subject: format!(
                            "Conversation escalated: {}",
                            session.user_name.as_deref().unwrap_or("anonymous user")
                        ),
                        body: format!(
                            "A conversation with agent \"{}\" needs attention.\n\n\
                             Reason: {}\nMessages so far: {}\nSession: {}\n",
                            agent.name,
                            session.escalation_reason,
                            session.message_count,
                            session.public_id
                        ),
                    })
                    .await?;
            }
        }
        Ok(())
    }
}

/// SMTP sender behind the `EmailNotification` task.
pub struct EmailNotifier {
    config: SmtpConfig,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub async fn send(&self, to: &str, subject: &str, body: &str) -> CoreResult<()> {
        use lettre::message::header::ContentType;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{Message, SmtpTransport, Transport};

        let email = Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| CoreError::Delivery(format!("bad from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| CoreError::Delivery(format!("bad recipient address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| CoreError::Delivery(format!("failed to build email: {e}")))?;

        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let host = self.config.host.clone();
        let port = self.config.port;
        tokio::task::spawn_blocking(move || {
            let mailer = SmtpTransport::relay(&host)
                .map_err(|e| CoreError::Delivery(format!("smtp relay: {e}")))?
                .port(port)
                .credentials(creds)
                .build();
            mailer
                .send(&email)
                .map_err(|e| CoreError::Delivery(format!("smtp send: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::Other(anyhow::anyhow!("blocking task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastBus;
    use crate::queue::CollectingQueue;
    use crate::session::MemorySessionStore;
    use crate::shared::models::Session;
    use chrono::Utc;
    use serde_json::json;

    fn support_user(agent_id: Uuid, receives: bool, admin: bool) -> SupportUser {
        SupportUser {
            id: Uuid::new_v4(),
            agent_id,
            name: "sam".to_string(),
            email: format!("{}@support.example", Uuid::new_v4()),
            receives_escalations: receives,
            is_super_admin: admin,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn test_agent(id: Uuid) -> Agent {
        Agent {
            id,
            owner_user_id: Uuid::new_v4(),
            name: "desk".to_string(),
            system_instructions: "Assist politely.".to_string(),
            model: "test-model".to_string(),
            fallback_model: None,
            temperature: 0.1,
            max_tokens: 256,
            retrieval_mode: "text_only".to_string(),
            general_collection: "kb".to_string(),
            learned_collection: "learned".to_string(),
            min_score: 0.5,
            learned_min_score: 0.75,
            require_validation: false,
            answer_below_threshold: false,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn notifier_with(
        users: Vec<SupportUser>,
    ) -> (EscalationNotifier, Arc<CollectingQueue>, Arc<BroadcastBus>, Arc<PresenceRegistry>) {
        let store = Arc::new(MemorySessionStore::new());
        for user in users {
            store.insert_support_user(user).await.unwrap();
        }
        let bus = Arc::new(BroadcastBus::new());
        let queue = Arc::new(CollectingQueue::new());
        let presence = Arc::new(PresenceRegistry::new());
        let notifier = EscalationNotifier::new(
            store,
            bus.clone(),
            queue.clone(),
            presence.clone(),
        );
        (notifier, queue, bus, presence)
    }

    #[tokio::test]
    async fn flagged_users_preferred_over_whole_team() {
        let agent_id = Uuid::new_v4();
        let flagged = support_user(agent_id, true, false);
        let unflagged = support_user(agent_id, false, false);
        let (notifier, _, _, _) =
            notifier_with(vec![flagged.clone(), unflagged.clone()]).await;

        let recipients = notifier.recipients(agent_id).await.unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].id, flagged.id);
    }

    #[tokio::test]
    async fn whole_team_when_nobody_is_flagged() {
        let agent_id = Uuid::new_v4();
        let a = support_user(agent_id, false, false);
        let b = support_user(agent_id, false, false);
        let (notifier, _, _, _) = notifier_with(vec![a, b]).await;

        let recipients = notifier.recipients(agent_id).await.unwrap();
        assert_eq!(recipients.len(), 2);
    }

    #[tokio::test]
    async fn super_admins_are_added_once() {
        let agent_id = Uuid::new_v4();
        // Flagged for the agent AND a super-admin: must appear exactly once.
        let mut both = support_user(agent_id, true, true);
        both.name = "dual".to_string();
        let other_admin = support_user(Uuid::new_v4(), false, true);
        let (notifier, _, _, _) = notifier_with(vec![both.clone(), other_admin.clone()]).await;

        let recipients = notifier.recipients(agent_id).await.unwrap();
        let ids: Vec<Uuid> = recipients.iter().map(|u| u.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&both.id));
        assert!(ids.contains(&other_admin.id));
    }

    #[tokio::test]
    async fn offline_recipients_get_an_email_task() {
        let agent = test_agent(Uuid::new_v4());
        let online = support_user(agent.id, true, false);
        let offline = support_user(agent.id, true, false);
        let (notifier, queue, bus, presence) =
            notifier_with(vec![online.clone(), offline.clone()]).await;
        presence.mark_online(online.id);

        let mut online_rx = bus.subscribe(&topics::user(online.id)).await;
        let session = Session::new(agent.id, None, None);
        notifier
            .notify_escalation(&session, &agent, &json!({"session_id": session.id}))
            .await
            .unwrap();

        assert!(online_rx.try_recv().is_ok());
        let tasks = queue.drained().await;
        assert_eq!(tasks.len(), 1);
        match &tasks[0] {
            Task::EmailNotification { to, .. } => assert_eq!(to, &offline.email),
            other => panic!("unexpected task: {other:?}"),
        }
    }
}
