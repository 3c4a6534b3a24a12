use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{ChatTurn, GenerationOutput, GenerationRequest, LLMProvider};
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::MessageRole;

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
        }
    }

    fn body(&self, request: &GenerationRequest) -> Value {
        let contents: Vec<Value> = request
            .messages
            .iter()
            .map(|ChatTurn { role, content }| {
                let gemini_role = match role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "model",
                };
                json!({"role": gemini_role, "parts": [{"text": content}]})
            })
            .collect();

        json!({
            "system_instruction": {"parts": [{"text": request.system}]},
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            }
        })
    }

    async fn call(&self, request: &GenerationRequest) -> CoreResult<Value> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );
        let response = self
            .client
            .post(url)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("gemini: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "gemini: HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("gemini: {e}")))
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn generate(&self, request: &GenerationRequest) -> CoreResult<GenerationOutput> {
        let result = self.call(request).await?;

        let content = result["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(GenerationOutput {
            content,
            model: request.model.clone(),
            tokens_prompt: result["usageMetadata"]["promptTokenCount"]
                .as_i64()
                .unwrap_or(0) as i32,
            tokens_completion: result["usageMetadata"]["candidatesTokenCount"]
                .as_i64()
                .unwrap_or(0) as i32,
        })
    }

    // Gemini streaming uses a separate SSE endpoint; emitting the whole
    // completion as one chunk keeps the contract while the SSE path is
    // unsupported.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> CoreResult<()> {
        let output = self.generate(request).await?;
        let _ = tx.send(output.content).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
