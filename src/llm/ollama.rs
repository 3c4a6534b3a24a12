use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{ChatTurn, GenerationOutput, GenerationRequest, LLMProvider};
use crate::shared::errors::{CoreError, CoreResult};

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
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
            "stream": stream,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        })
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate(&self, request: &GenerationRequest) -> CoreResult<GenerationOutput> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.body(request, false))
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("ollama: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "ollama: HTTP {}",
                response.status()
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("ollama: {e}")))?;

        Ok(GenerationOutput {
            content: result["message"]["content"].as_str().unwrap_or("").to_string(),
            model: result["model"].as_str().unwrap_or(&request.model).to_string(),
            tokens_prompt: result["prompt_eval_count"].as_i64().unwrap_or(0) as i32,
            tokens_completion: result["eval_count"].as_i64().unwrap_or(0) as i32,
        })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> CoreResult<()> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.body(request, true))
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("ollama: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "ollama: HTTP {}",
                response.status()
            )));
        }

        // Ollama streams newline-delimited JSON objects.
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CoreError::ProviderUnavailable(format!("ollama: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].to_string();
                buffer.drain(..=pos);
                let Ok(parsed) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                if parsed["done"].as_bool() == Some(true) {
                    return Ok(());
                }
                if let Some(token) = parsed["message"]["content"].as_str() {
                    if tx.send(token.to_string()).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
