use chrono::Utc;
use log::info;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::embeddings::EmbeddingProvider;
use crate::shared::errors::CoreResult;
use crate::shared::models::Agent;
use crate::vectordb::{VectorRecord, VectorStore};

/// Writes human-validated corrections back into the retrieval index. Entries
/// are created on approval, never mutated, and removed only by explicit
/// admin action.
pub struct LearningService {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl LearningService {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Persists an approved question/answer pair as a learned entry keyed by
    /// the originating message. Returns the new entry id.
    pub async fn record(
        &self,
        agent: &Agent,
        original_message_id: Uuid,
        question: &str,
        answer: &str,
    ) -> CoreResult<Uuid> {
        let vector = self.embedder.embed(question).await?;
        self.store
            .ensure_collection(&agent.learned_collection, self.embedder.dimensions())
            .await?;

        let entry_id = Uuid::new_v4();
        let record = VectorRecord {
            id: entry_id,
            vector,
            payload: json!({
                "agent_id": agent.id.to_string(),
                "original_message_id": original_message_id.to_string(),
                "question": question,
                "answer": answer,
                "content": format!("Q: {question}\nA: {answer}"),
                "created_at": Utc::now().to_rfc3339(),
            }),
        };
        self.store
            .upsert(&agent.learned_collection, vec![record])
            .await?;

        info!(
            "learned entry {entry_id} recorded for agent {} (message {original_message_id})",
            agent.id
        );
        Ok(entry_id)
    }

    /// Admin-only removal of a learned entry.
    pub async fn delete(&self, agent: &Agent, entry_id: Uuid) -> CoreResult<()> {
        self.store
            .delete(&agent.learned_collection, &[entry_id])
            .await
    }
}

/// Background reindexer: folds a finished conversation into the agent's
/// general collection as one document, so future sessions can retrieve it.
pub struct ConversationIndexer {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    sessions: Arc<dyn crate::session::SessionStore>,
}

impl ConversationIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        sessions: Arc<dyn crate::session::SessionStore>,
    ) -> Self {
        Self {
            embedder,
            store,
            sessions,
        }
    }

    pub async fn reindex(&self, agent_id: Uuid, session_id: Uuid) -> CoreResult<()> {
        let agent = self.sessions.get_agent(agent_id).await?;
        let history = self.sessions.session_history(session_id).await?;

        // Rejected answers never make it into the index.
        let transcript: Vec<String> = history
            .iter()
            .filter(|m| {
                m.validation_status() != crate::shared::models::ValidationStatus::Rejected
            })
            .map(|m| format!("{}: {}", m.role, m.delivered_content()))
            .collect();
        if transcript.is_empty() {
            return Ok(());
        }
        let document = transcript.join("\n");

        let vector = self.embedder.embed(&document).await?;
        self.store
            .ensure_collection(&agent.general_collection, self.embedder.dimensions())
            .await?;
        self.store
            .upsert(
                &agent.general_collection,
                vec![VectorRecord {
                    id: session_id,
                    vector,
                    payload: json!({
                        "agent_id": agent.id.to_string(),
                        "session_id": session_id.to_string(),
                        "content": document,
                        "source": "conversation",
                        "created_at": Utc::now().to_rfc3339(),
                    }),
                }],
            )
            .await?;

        info!("reindexed session {session_id} into {}", agent.general_collection);
        Ok(())
    }
}
