use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::LlmConfig;
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::MessageRole;

pub mod fallback;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use fallback::FallbackChain;

/// One turn of conversation context handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatTurn>,
    pub temperature: f64,
    pub max_tokens: i32,
}

/// Raw provider output; the fallback chain wraps this into a
/// [`GenerationResult`] with latency and substitution metadata.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub content: String,
    pub model: String,
    pub tokens_prompt: i32,
    pub tokens_completion: i32,
}

/// Final generation outcome, including whether the fallback provider had to
/// stand in for the requested model.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub content: String,
    pub model: String,
    pub requested_model: String,
    pub tokens_prompt: i32,
    pub tokens_completion: i32,
    pub generation_time_ms: i64,
    pub used_fallback: bool,
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> CoreResult<GenerationOutput>;

    /// Streams tokens into `tx`. The consumer cancels by dropping the
    /// receiver; the provider must then stop pulling and release the
    /// connection. A cancelled stream is not an error.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> CoreResult<()>;

    fn name(&self) -> &str;
}

/// Provider selection happens once, from configuration. Call sites only ever
/// see `Arc<dyn LLMProvider>`.
pub fn provider_from_config(config: &LlmConfig) -> CoreResult<Arc<dyn LLMProvider>> {
    build_provider(&config.provider, config)
}

pub fn fallback_provider_from_config(config: &LlmConfig) -> CoreResult<Option<Arc<dyn LLMProvider>>> {
    match &config.fallback_provider {
        Some(name) => Ok(Some(build_provider(name, config)?)),
        None => Ok(None),
    }
}

fn build_provider(name: &str, config: &LlmConfig) -> CoreResult<Arc<dyn LLMProvider>> {
    match name {
        "openai" => Ok(Arc::new(openai::OpenAiProvider::new(
            config.api_key.clone(),
            config.base_url.clone(),
        ))),
        "ollama" => Ok(Arc::new(ollama::OllamaProvider::new(
            config.base_url.clone(),
        ))),
        "gemini" => Ok(Arc::new(gemini::GeminiProvider::new(
            config.api_key.clone(),
            config.base_url.clone(),
        ))),
        other => Err(CoreError::validation(
            "llm_provider",
            format!("unknown provider `{other}`"),
        )),
    }
}
