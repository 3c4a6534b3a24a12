use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{ChatTurn, GenerationOutput, GenerationRequest, LLMProvider};
use crate::shared::errors::{CoreError, CoreResult};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        }
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system})];
        for ChatTurn { role, content } in &request.messages {
            messages.push(json!({"role": role.as_str(), "content": content}));
        }
        json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    async fn generate(&self, request: &GenerationRequest) -> CoreResult<GenerationOutput> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.body(request, false))
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("openai: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "openai: HTTP {}",
                response.status()
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("openai: {e}")))?;

        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(GenerationOutput {
            content,
            model: result["model"]
                .as_str()
                .unwrap_or(&request.model)
                .to_string(),
            tokens_prompt: result["usage"]["prompt_tokens"].as_i64().unwrap_or(0) as i32,
            tokens_completion: result["usage"]["completion_tokens"].as_i64().unwrap_or(0) as i32,
        })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> CoreResult<()> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.body(request, true))
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("openai: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "openai: HTTP {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CoreError::ProviderUnavailable(format!("openai: {e}")))?;
            let chunk_str = String::from_utf8_lossy(&chunk);
            for line in chunk_str.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if data.trim() == "[DONE]" {
                        return Ok(());
                    }
                    if let Ok(parsed) = serde_json::from_str::<Value>(data) {
                        if let Some(token) = parsed["choices"][0]["delta"]["content"].as_str() {
                            // Receiver dropped means the consumer cancelled;
                            // dropping the stream releases the connection.
                            if tx.send(token.to_string()).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "openai"
    }
}
