//! End-to-end turn orchestration over the in-memory backends: confidence
//! gating, validation gating, escalation fan-out, claim/resolve lifecycle
//! and the failure path.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use supportdesk::broadcast::{topics, BroadcastBus, MessageBus};
use supportdesk::config::RetrievalDefaults;
use supportdesk::dispatcher::{ChatOutcome, DispatcherService};
use supportdesk::embeddings::EmbeddingProvider;
use supportdesk::learning::LearningService;
use supportdesk::llm::{
    FallbackChain, GenerationOutput, GenerationRequest, LLMProvider,
};
use supportdesk::notifications::{EscalationNotifier, PresenceRegistry};
use supportdesk::queue::{CollectingQueue, Task};
use supportdesk::rag::{NoopHydration, RagService};
use supportdesk::session::{MemorySessionStore, SessionStore, ValidationAction};
use supportdesk::shared::errors::{CoreError, CoreResult};
use supportdesk::shared::models::{
    Agent, EscalationReason, Message, Session, SessionStatus, SupportUser, ValidationStatus,
    WebhookSubscription,
};
use supportdesk::vectordb::{MemoryVectorStore, VectorRecord, VectorStore};
use supportdesk::webhooks::{MemoryWebhookStore, WebhookDispatcher, WebhookStore};

struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> CoreResult<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    fn dimensions(&self) -> usize {
        2
    }
}

struct ScriptedLlm {
    fail: bool,
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn generate(&self, request: &GenerationRequest) -> CoreResult<GenerationOutput> {
        if self.fail {
            return Err(CoreError::ProviderUnavailable("model offline".into()));
        }
        Ok(GenerationOutput {
            content: "Here is how you reset your password.".to_string(),
            model: request.model.clone(),
            tokens_prompt: 12,
            tokens_completion: 9,
        })
    }

    async fn generate_stream(
        &self,
        _request: &GenerationRequest,
        _tx: mpsc::Sender<String>,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Fails the first `failures` generations, then answers; records every
/// prompt it was handed.
struct FlakyLlm {
    failures_left: AtomicUsize,
    seen: Mutex<Vec<GenerationRequest>>,
}

impl FlakyLlm {
    fn new(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LLMProvider for FlakyLlm {
    async fn generate(&self, request: &GenerationRequest) -> CoreResult<GenerationOutput> {
        self.seen.lock().unwrap().push(request.clone());
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CoreError::ProviderUnavailable("model offline".into()));
        }
        Ok(GenerationOutput {
            content: "Recovered answer.".to_string(),
            model: request.model.clone(),
            tokens_prompt: 5,
            tokens_completion: 4,
        })
    }

    async fn generate_stream(
        &self,
        _request: &GenerationRequest,
        _tx: mpsc::Sender<String>,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

fn agent(require_validation: bool) -> Agent {
    Agent {
        id: Uuid::new_v4(),
        owner_user_id: Uuid::new_v4(),
        name: "helpdesk".to_string(),
        system_instructions: "Answer from the provided evidence.".to_string(),
        model: "test-model".to_string(),
        fallback_model: None,
        temperature: 0.2,
        max_tokens: 512,
        retrieval_mode: "text_only".to_string(),
        general_collection: "kb".to_string(),
        learned_collection: "learned".to_string(),
        min_score: 0.5,
        learned_min_score: 0.75,
        require_validation,
        answer_below_threshold: false,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Unit vector whose cosine similarity with [1, 0] is exactly `score`.
fn vector_scoring(score: f32) -> Vec<f32> {
    vec![score, (1.0 - score * score).sqrt()]
}

struct Harness {
    sessions: Arc<MemorySessionStore>,
    vectors: Arc<MemoryVectorStore>,
    webhook_store: Arc<MemoryWebhookStore>,
    bus: Arc<BroadcastBus>,
    queue: Arc<CollectingQueue>,
    dispatcher: DispatcherService,
}

async fn harness(agent: &Agent, llm_fails: bool) -> Harness {
    harness_with(agent, Arc::new(ScriptedLlm { fail: llm_fails })).await
}

async fn harness_with(agent: &Agent, provider: Arc<dyn LLMProvider>) -> Harness {
    let sessions = Arc::new(MemorySessionStore::new());
    sessions.insert_agent(agent.clone()).await.unwrap();

    let vectors = Arc::new(MemoryVectorStore::new());
    vectors
        .ensure_collection(&agent.general_collection, 2)
        .await
        .unwrap();
    vectors
        .ensure_collection(&agent.learned_collection, 2)
        .await
        .unwrap();

    let embedder = Arc::new(FixedEmbedder);
    let llm = Arc::new(FallbackChain::new(
        provider,
        None,
        None,
        Duration::from_secs(5),
    ));
    let rag = Arc::new(RagService::new(
        embedder.clone(),
        vectors.clone(),
        Arc::new(NoopHydration),
        llm,
        RetrievalDefaults::default(),
    ));
    let learning = Arc::new(LearningService::new(embedder, vectors.clone()));

    let bus = Arc::new(BroadcastBus::new());
    let queue = Arc::new(CollectingQueue::new());
    let webhook_store = Arc::new(MemoryWebhookStore::new());
    let webhooks = Arc::new(WebhookDispatcher::new(
        webhook_store.clone(),
        queue.clone(),
    ));
    let presence = Arc::new(PresenceRegistry::new());
    let notifier = Arc::new(EscalationNotifier::new(
        sessions.clone(),
        bus.clone(),
        queue.clone(),
        presence,
    ));

    let dispatcher = DispatcherService::new(
        sessions.clone(),
        rag,
        bus.clone(),
        webhooks,
        notifier,
        queue.clone(),
        learning,
    );

    Harness {
        sessions,
        vectors,
        webhook_store,
        bus,
        queue,
        dispatcher,
    }
}

async fn seed_knowledge(h: &Harness, agent: &Agent, score: f32) {
    h.vectors
        .upsert(
            &agent.general_collection,
            vec![VectorRecord {
                id: Uuid::new_v4(),
                vector: vector_scoring(score),
                payload: json!({
                    "agent_id": agent.id.to_string(),
                    "content": "Password resets happen from the account page.",
                    "created_at": Utc::now().to_rfc3339(),
                }),
            }],
        )
        .await
        .unwrap();
}

async fn new_session(h: &Harness, agent: &Agent) -> Session {
    h.sessions
        .create_session(Session::new(agent.id, Some("dana".into()), None))
        .await
        .unwrap()
}

#[tokio::test]
async fn confident_turn_answers_publicly_when_no_validation_required() {
    let agent = agent(false);
    let h = harness(&agent, false).await;
    seed_knowledge(&h, &agent, 0.9).await;
    let session = new_session(&h, &agent).await;

    let mut public = h
        .bus
        .subscribe(&topics::chat_session(session.public_id))
        .await;

    let outcome = h
        .dispatcher
        .chat(session.id, "how do I reset my password?")
        .await
        .unwrap();

    let ChatOutcome::Answered {
        message,
        pending_validation,
    } = outcome
    else {
        panic!("expected an answer");
    };
    assert!(!pending_validation);
    assert_eq!(message.validation_status(), ValidationStatus::NotRequired);
    assert_eq!(message.model.as_deref(), Some("test-model"));
    assert!(message.rag_sources.as_array().is_some_and(|a| !a.is_empty()));

    // user message arrival, then completion, both on the public topic
    let first = public.recv().await.unwrap();
    assert_eq!(first["role"], "user");
    let second = public.recv().await.unwrap();
    assert_eq!(second["status"], "completed");
}

#[tokio::test]
async fn validation_required_keeps_answer_off_the_public_channel() {
    let agent = agent(true);
    let h = harness(&agent, false).await;
    seed_knowledge(&h, &agent, 0.9).await;
    let session = new_session(&h, &agent).await;

    let mut public = h
        .bus
        .subscribe(&topics::chat_session(session.public_id))
        .await;
    let mut review = h.bus.subscribe(&topics::agent_support(agent.id)).await;

    let outcome = h
        .dispatcher
        .chat(session.id, "how do I reset my password?")
        .await
        .unwrap();

    let ChatOutcome::Answered {
        message,
        pending_validation,
    } = outcome
    else {
        panic!("expected an answer");
    };
    assert!(pending_validation);
    assert_eq!(message.validation_status(), ValidationStatus::Pending);

    // Public topic saw only the user message.
    let first = public.recv().await.unwrap();
    assert_eq!(first["role"], "user");
    assert!(public.try_recv().is_err());
    // Review channel got the draft.
    let draft = review.recv().await.unwrap();
    assert_eq!(draft["status"], "completed");
}

#[tokio::test]
async fn low_confidence_escalates_without_an_assistant_row() {
    let agent = agent(false);
    let h = harness(&agent, false).await;
    seed_knowledge(&h, &agent, 0.42).await;
    let session = new_session(&h, &agent).await;

    let mut admin = h.bus.subscribe(&topics::admin_escalations()).await;

    let outcome = h
        .dispatcher
        .chat(session.id, "something entirely off-topic")
        .await
        .unwrap();

    let ChatOutcome::Escalated { session: updated } = outcome else {
        panic!("expected escalation");
    };
    assert_eq!(updated.status(), SessionStatus::Escalated);
    assert_eq!(updated.escalation_reason(), EscalationReason::LowConfidence);

    let history = h.sessions.session_history(session.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, "user");

    let event = admin.recv().await.unwrap();
    assert_eq!(event["escalation_reason"], "low_confidence");
}

#[tokio::test]
async fn escalation_dispatches_matching_webhooks() {
    let agent = agent(false);
    let h = harness(&agent, false).await;
    seed_knowledge(&h, &agent, 0.42).await;
    let session = new_session(&h, &agent).await;

    h.webhook_store
        .insert_subscription(WebhookSubscription {
            id: Uuid::new_v4(),
            owner_user_id: agent.owner_user_id,
            url: "https://integrator.example/hook".to_string(),
            events: vec!["session.escalated".to_string()],
            is_active: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    h.dispatcher
        .chat(session.id, "unanswerable")
        .await
        .unwrap();

    let tasks = h.queue.drained().await;
    let deliveries = tasks
        .iter()
        .filter(|t| matches!(t, Task::WebhookDelivery { .. }))
        .count();
    assert_eq!(deliveries, 1);
}

#[tokio::test]
async fn generation_failure_persists_error_and_offers_retry() {
    let agent = agent(false);
    let h = harness(&agent, true).await;
    seed_knowledge(&h, &agent, 0.9).await;
    let session = new_session(&h, &agent).await;

    let mut public = h
        .bus
        .subscribe(&topics::chat_session(session.public_id))
        .await;

    let outcome = h.dispatcher.chat(session.id, "hello?").await.unwrap();
    let ChatOutcome::Failed { message, .. } = outcome else {
        panic!("expected failure");
    };
    assert!(message.processing_error.is_some());
    assert_eq!(message.retry_count, 1);

    let _user_msg = public.recv().await.unwrap();
    let failed = public.recv().await.unwrap();
    assert_eq!(failed["status"], "failed");
    assert_eq!(failed["can_retry"], true);
    assert_eq!(failed["retry_count"], 1);
}

#[tokio::test]
async fn retry_re_drives_the_failed_message_in_place() {
    let agent = agent(false);
    let h = harness_with(&agent, Arc::new(FlakyLlm::new(2))).await;
    seed_knowledge(&h, &agent, 0.9).await;
    let session = new_session(&h, &agent).await;

    let ChatOutcome::Failed { message, .. } =
        h.dispatcher.chat(session.id, "hello?").await.unwrap()
    else {
        panic!("expected failure");
    };
    assert_eq!(message.retry_count, 1);

    // Second failure lands on the same row and bumps the counter.
    let ChatOutcome::Failed {
        message: second, ..
    } = h.dispatcher.retry_message(message.id).await.unwrap()
    else {
        panic!("expected failure");
    };
    assert_eq!(second.id, message.id);
    assert_eq!(second.retry_count, 2);

    // Third attempt succeeds, still on the same row.
    let ChatOutcome::Answered {
        message: answered, ..
    } = h.dispatcher.retry_message(message.id).await.unwrap()
    else {
        panic!("expected an answer");
    };
    assert_eq!(answered.id, message.id);
    assert!(answered.processing_error.is_none());
    assert_eq!(answered.content, "Recovered answer.");

    // One user message, one answer; retries appended nothing.
    let history = h.sessions.session_history(session.id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn failed_turns_stay_out_of_later_prompts() {
    let agent = agent(false);
    let llm = Arc::new(FlakyLlm::new(1));
    let h = harness_with(&agent, llm.clone()).await;
    seed_knowledge(&h, &agent, 0.9).await;
    let session = new_session(&h, &agent).await;

    let ChatOutcome::Failed { .. } =
        h.dispatcher.chat(session.id, "first question").await.unwrap()
    else {
        panic!("expected failure");
    };
    let ChatOutcome::Answered { .. } =
        h.dispatcher.chat(session.id, "second question").await.unwrap()
    else {
        panic!("expected an answer");
    };

    // The failed placeholder never re-enters the prompt; the original user
    // question still does.
    let seen = llm.seen.lock().unwrap();
    let last = seen.last().unwrap();
    assert!(last.messages.iter().all(|turn| !turn.content.is_empty()));
    assert!(last
        .messages
        .iter()
        .any(|turn| turn.content == "first question"));
}

#[tokio::test]
async fn claim_resolve_lifecycle_emits_events_and_reindex() {
    let agent = agent(false);
    let h = harness(&agent, false).await;
    let session = new_session(&h, &agent).await;

    let support = h
        .sessions
        .insert_support_user(SupportUser {
            id: Uuid::new_v4(),
            agent_id: agent.id,
            name: "sam".to_string(),
            email: "sam@support.example".to_string(),
            receives_escalations: true,
            is_super_admin: false,
            is_active: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    h.dispatcher
        .escalate(session.id, EscalationReason::UserRequest)
        .await
        .unwrap();
    let mut team = h.bus.subscribe(&topics::agent_support(agent.id)).await;

    let claimed = h.dispatcher.claim(session.id, support.id).await.unwrap();
    assert_eq!(claimed.status(), SessionStatus::Assigned);
    let assigned = team.recv().await.unwrap();
    assert_eq!(assigned["support_agent"]["name"], "sam");

    // Losing claim attempt conflicts.
    let err = h
        .dispatcher
        .claim(session.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::AssignmentConflict));

    h.queue.drained().await;
    let resolved = h
        .dispatcher
        .resolve(session.id, Some(support.id), "handled")
        .await
        .unwrap();
    assert_eq!(resolved.status(), SessionStatus::Resolved);

    let tasks = h.queue.drained().await;
    assert!(tasks
        .iter()
        .any(|t| matches!(t, Task::ReindexConversation { .. })));

    // Duplicate resolve: no new events on the team channel.
    let event = team.recv().await.unwrap();
    assert!(event.get("resolution_type").is_some());
    h.dispatcher
        .resolve(session.id, None, "handled")
        .await
        .unwrap();
    assert!(team.try_recv().is_err());
}

#[tokio::test]
async fn correction_delivers_edited_content_and_learns() {
    let agent = agent(true);
    let h = harness(&agent, false).await;
    seed_knowledge(&h, &agent, 0.9).await;
    let session = new_session(&h, &agent).await;

    let outcome = h
        .dispatcher
        .chat(session.id, "how do I reset my password?")
        .await
        .unwrap();
    let ChatOutcome::Answered { message, .. } = outcome else {
        panic!("expected an answer");
    };

    let mut public = h
        .bus
        .subscribe(&topics::chat_session(session.public_id))
        .await;

    let validated = h
        .dispatcher
        .validate(
            message.id,
            ValidationAction::Correct {
                corrected_content: "Use the reset link on the sign-in page.".to_string(),
            },
            true,
        )
        .await
        .unwrap();
    assert_eq!(validated.validation_status(), ValidationStatus::Corrected);

    let event = public.recv().await.unwrap();
    assert_eq!(event["content"], "Use the reset link on the sign-in page.");

    // The corrected pair landed in the learned collection.
    let hits = h
        .vectors
        .search(
            &agent.learned_collection,
            &[1.0, 0.0],
            &supportdesk::vectordb::SearchFilter::for_agent(agent.id),
            3,
            0.75,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].content().contains("reset link"));
}

#[tokio::test]
async fn messages_while_escalated_are_relayed_not_answered() {
    let agent = agent(false);
    let h = harness(&agent, false).await;
    seed_knowledge(&h, &agent, 0.9).await;
    let session = new_session(&h, &agent).await;

    h.dispatcher
        .escalate(session.id, EscalationReason::NegativeFeedback)
        .await
        .unwrap();

    let outcome = h
        .dispatcher
        .chat(session.id, "are you still there?")
        .await
        .unwrap();
    assert!(matches!(outcome, ChatOutcome::AwaitingHuman { .. }));

    let history = h.sessions.session_history(session.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, "user");
}

#[tokio::test]
async fn empty_message_is_rejected_synchronously() {
    let agent = agent(false);
    let h = harness(&agent, false).await;
    let session = new_session(&h, &agent).await;

    let err = h.dispatcher.chat(session.id, "   ").await.unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
    assert!(h
        .sessions
        .session_history(session.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn learned_evidence_outranks_fresh_retrieval() {
    let agent = agent(false);
    let h = harness(&agent, false).await;
    seed_knowledge(&h, &agent, 0.9).await;
    h.vectors
        .upsert(
            &agent.learned_collection,
            vec![VectorRecord {
                id: Uuid::new_v4(),
                vector: vector_scoring(0.82),
                payload: json!({
                    "agent_id": agent.id.to_string(),
                    "content": "Q: reset?\nA: previously validated answer",
                    "created_at": Utc::now().to_rfc3339(),
                }),
            }],
        )
        .await
        .unwrap();
    let session = new_session(&h, &agent).await;

    let outcome = h
        .dispatcher
        .chat(session.id, "how do I reset my password?")
        .await
        .unwrap();
    let ChatOutcome::Answered { message, .. } = outcome else {
        panic!("expected an answer");
    };

    let sources = message.rag_sources.as_array().cloned().unwrap_or_default();
    assert!(sources.len() >= 2);
    assert_eq!(sources[0]["learned"], true);
}
