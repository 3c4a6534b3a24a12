use log::{debug, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::RetrievalDefaults;
use crate::embeddings::EmbeddingProvider;
use crate::llm::{ChatTurn, FallbackChain, GenerationResult};
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::{Agent, RetrievalMode};
use crate::vectordb::{ScoredHit, SearchFilter, VectorStore};

pub mod hydration;
pub mod prompt;

pub use hydration::{HydrationService, NoopHydration, SqlHydration};
pub use prompt::PromptBuilder;

/// One piece of supporting evidence, kept for the turn only. Persisted
/// messages reference it through [`RetrievalResult::source_ref`].
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub id: Uuid,
    pub score: f64,
    pub content: String,
    pub payload: Value,
    pub hydrated_payload: Option<Value>,
    pub learned: bool,
}

impl RetrievalResult {
    fn from_hit(hit: ScoredHit, learned: bool) -> Self {
        Self {
            id: hit.id,
            score: hit.score,
            content: hit.content(),
            payload: hit.payload,
            hydrated_payload: None,
            learned,
        }
    }

    pub fn source_ref(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "score": self.score,
            "learned": self.learned,
        })
    }
}

#[derive(Debug)]
pub enum RagOutcome {
    Answered {
        generation: GenerationResult,
        evidence: Vec<RetrievalResult>,
    },
    /// A routing decision, not a failure: nothing retrieved cleared the
    /// agent's confidence threshold, so no generation was attempted.
    NoConfidentAnswer { best_score: Option<f64> },
}

/// Composes embedding, vector search, hydration, prompt construction and
/// generation into one scored answer plus its supporting evidence.
pub struct RagService {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    hydration: Arc<dyn HydrationService>,
    llm: Arc<FallbackChain>,
    prompt: PromptBuilder,
    defaults: RetrievalDefaults,
}

impl RagService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        hydration: Arc<dyn HydrationService>,
        llm: Arc<FallbackChain>,
        defaults: RetrievalDefaults,
    ) -> Self {
        let prompt = PromptBuilder::new(defaults.history_token_budget);
        Self {
            embedder,
            store,
            hydration,
            llm,
            prompt,
            defaults,
        }
    }

    pub async fn answer(
        &self,
        agent: &Agent,
        query: &str,
        history: &[ChatTurn],
    ) -> CoreResult<RagOutcome> {
        // Embedding failure aborts the turn; no partial context ever reaches
        // the model.
        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| CoreError::Retrieval(format!("query embedding: {e}")))?;

        let filter = SearchFilter::for_agent(agent.id);

        // Previously human-validated answers are searched first, with the
        // stricter threshold.
        let learned_hits = self
            .store
            .search(
                &agent.learned_collection,
                &vector,
                &filter,
                self.defaults.learned_limit,
                agent.learned_min_score,
            )
            .await?;

        // The general pass runs unthresholded so a below-threshold turn can
        // still report its best score; the cut is applied locally.
        let general_hits = self
            .store
            .search(
                &agent.general_collection,
                &vector,
                &filter,
                self.defaults.general_limit,
                0.0,
            )
            .await?;

        let best_score = learned_hits
            .first()
            .map(|h| h.score)
            .into_iter()
            .chain(general_hits.first().map(|h| h.score))
            .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |a| a.max(s))));

        let confident = best_score.is_some_and(|s| s >= agent.min_score);
        if !confident && !agent.answer_below_threshold {
            debug!(
                "no confident answer for agent {} (best score {:?}, min {})",
                agent.id, best_score, agent.min_score
            );
            return Ok(RagOutcome::NoConfidentAnswer { best_score });
        }

        // Learned evidence is pinned ahead of fresh retrieval; the general
        // pass never outranks a validated answer.
        let mut evidence: Vec<RetrievalResult> = learned_hits
            .into_iter()
            .map(|hit| RetrievalResult::from_hit(hit, true))
            .collect();
        for hit in general_hits {
            if hit.score < agent.min_score && !agent.answer_below_threshold {
                continue;
            }
            if evidence.iter().any(|e| e.id == hit.id) {
                continue;
            }
            evidence.push(RetrievalResult::from_hit(hit, false));
        }

        if agent.retrieval_mode() == RetrievalMode::SqlHydration {
            for result in &mut evidence {
                match self.hydration.hydrate(&result.payload).await {
                    Ok(hydrated) => result.hydrated_payload = Some(hydrated),
                    Err(e) => {
                        // Downgrade this result rather than failing the turn.
                        warn!("hydration failed for {}: {e}", result.id);
                        result.hydrated_payload = None;
                    }
                }
            }
        }

        let request = self.prompt.build(agent, history, query, &evidence);
        let generation = self.llm.generate(&request).await?;

        Ok(RagOutcome::Answered {
            generation,
            evidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationOutput, GenerationRequest, LLMProvider};
    use crate::vectordb::{MemoryVectorStore, VectorRecord};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FixedEmbedder {
        vector: Vec<f32>,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> CoreResult<Vec<f32>> {
            if self.fail {
                return Err(CoreError::ProviderUnavailable("embedder down".into()));
            }
            Ok(self.vector.clone())
        }

        fn dimensions(&self) -> usize {
            self.vector.len()
        }
    }

    struct EchoLlm;

    #[async_trait]
    impl LLMProvider for EchoLlm {
        async fn generate(&self, request: &GenerationRequest) -> CoreResult<GenerationOutput> {
            Ok(GenerationOutput {
                content: "generated answer".to_string(),
                model: request.model.clone(),
                tokens_prompt: 1,
                tokens_completion: 1,
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
            "echo"
        }
    }

    struct CountingHydration {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl HydrationService for CountingHydration {
        async fn hydrate(&self, payload: &Value) -> CoreResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoreError::Retrieval("sql backend down".into()));
            }
            let mut hydrated = payload.clone();
            hydrated["hydrated_data"] = json!(["row"]);
            Ok(hydrated)
        }
    }

    fn agent(mode: &str) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            name: "desk".to_string(),
            system_instructions: "Assist politely.".to_string(),
            model: "test-model".to_string(),
            fallback_model: None,
            temperature: 0.1,
            max_tokens: 256,
            retrieval_mode: mode.to_string(),
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

    /// Unit vector whose cosine similarity with [1, 0] is exactly `score`.
    fn vector_scoring(score: f32) -> Vec<f32> {
        vec![score, (1.0 - score * score).sqrt()]
    }

    fn record(agent_id: Uuid, score: f32, content: &str) -> VectorRecord {
        VectorRecord {
            id: Uuid::new_v4(),
            vector: vector_scoring(score),
            payload: json!({
                "agent_id": agent_id.to_string(),
                "content": content,
                "created_at": Utc::now().to_rfc3339(),
            }),
        }
    }

    async fn service(
        store: Arc<MemoryVectorStore>,
        hydration: Arc<CountingHydration>,
        embed_fail: bool,
    ) -> RagService {
        RagService::new(
            Arc::new(FixedEmbedder {
                vector: vec![1.0, 0.0],
                fail: embed_fail,
            }),
            store,
            hydration,
            Arc::new(FallbackChain::new(
                Arc::new(EchoLlm),
                None,
                None,
                Duration::from_secs(5),
            )),
            RetrievalDefaults::default(),
        )
    }

    async fn seeded_store() -> Arc<MemoryVectorStore> {
        let store = Arc::new(MemoryVectorStore::new());
        store.ensure_collection("kb", 2).await.unwrap();
        store.ensure_collection("learned", 2).await.unwrap();
        store
    }

    #[tokio::test]
    async fn learned_entry_is_pinned_ahead_of_general_results() {
        let agent = agent("text_only");
        let store = seeded_store().await;
        store
            .upsert("learned", vec![record(agent.id, 0.82, "validated answer")])
            .await
            .unwrap();
        store
            .upsert("kb", vec![record(agent.id, 0.9, "fresh document")])
            .await
            .unwrap();

        let hydration = Arc::new(CountingHydration {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let rag = service(store, hydration, false).await;

        let outcome = rag.answer(&agent, "question", &[]).await.unwrap();
        let RagOutcome::Answered { evidence, .. } = outcome else {
            panic!("expected an answer");
        };
        assert_eq!(evidence.len(), 2);
        assert!(evidence[0].learned);
        assert_eq!(evidence[0].content, "validated answer");
        assert_eq!(evidence[1].content, "fresh document");
    }

    #[tokio::test]
    async fn below_threshold_yields_no_confident_answer() {
        let agent = agent("text_only");
        let store = seeded_store().await;
        store
            .upsert("kb", vec![record(agent.id, 0.42, "weak match")])
            .await
            .unwrap();

        let hydration = Arc::new(CountingHydration {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let rag = service(store, hydration, false).await;

        match rag.answer(&agent, "question", &[]).await.unwrap() {
            RagOutcome::NoConfidentAnswer { best_score } => {
                let best = best_score.expect("best score reported");
                assert!((best - 0.42).abs() < 0.01);
            }
            RagOutcome::Answered { .. } => panic!("must not generate below threshold"),
        }
    }

    #[tokio::test]
    async fn text_only_agents_never_hydrate() {
        let agent = agent("text_only");
        let store = seeded_store().await;
        store
            .upsert("kb", vec![record(agent.id, 0.9, "doc")])
            .await
            .unwrap();

        let hydration = Arc::new(CountingHydration {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let rag = service(store, hydration.clone(), false).await;

        rag.answer(&agent, "question", &[]).await.unwrap();
        assert_eq!(hydration.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hydration_failure_downgrades_the_result() {
        let agent = agent("sql_hydration");
        let store = seeded_store().await;
        store
            .upsert("kb", vec![record(agent.id, 0.9, "doc")])
            .await
            .unwrap();

        let hydration = Arc::new(CountingHydration {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let rag = service(store, hydration.clone(), false).await;

        let RagOutcome::Answered { evidence, .. } =
            rag.answer(&agent, "question", &[]).await.unwrap()
        else {
            panic!("expected an answer");
        };
        assert_eq!(hydration.calls.load(Ordering::SeqCst), 1);
        assert!(evidence[0].hydrated_payload.is_none());
    }

    #[tokio::test]
    async fn sql_hydration_attaches_data() {
        let agent = agent("sql_hydration");
        let store = seeded_store().await;
        store
            .upsert("kb", vec![record(agent.id, 0.9, "doc")])
            .await
            .unwrap();

        let hydration = Arc::new(CountingHydration {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let rag = service(store, hydration, false).await;

        let RagOutcome::Answered { evidence, .. } =
            rag.answer(&agent, "question", &[]).await.unwrap()
        else {
            panic!("expected an answer");
        };
        let hydrated = evidence[0].hydrated_payload.as_ref().unwrap();
        assert_eq!(hydrated["hydrated_data"], json!(["row"]));
    }

    #[tokio::test]
    async fn embedding_failure_aborts_the_turn() {
        let agent = agent("text_only");
        let store = seeded_store().await;
        let hydration = Arc::new(CountingHydration {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let rag = service(store, hydration, true).await;

        let err = rag.answer(&agent, "question", &[]).await.unwrap_err();
        assert!(matches!(err, CoreError::Retrieval(_)));
    }
}
