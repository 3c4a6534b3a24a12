use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::shared::errors::{CoreError, CoreResult};

/// Text to fixed-length vector. A failure here aborts the retrieval turn;
/// the pipeline never sends partial or garbled context to the model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>>;
    fn dimensions(&self) -> usize;
}

pub fn embedder_from_config(config: &EmbeddingConfig) -> CoreResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalEmbeddings::new(
            config.endpoint.clone(),
            config.dimensions,
        ))),
        "openai" => Ok(Arc::new(OpenAiEmbeddings::new(
            config.api_key.clone().unwrap_or_default(),
            config.dimensions,
        ))),
        other => Err(CoreError::validation(
            "embedding_provider",
            format!("unknown provider `{other}`"),
        )),
    }
}

/// Sidecar embedding service speaking a minimal `{text, model}` protocol.
pub struct LocalEmbeddings {
    client: reqwest::Client,
    endpoint: String,
    dimensions: usize,
}

impl LocalEmbeddings {
    pub fn new(endpoint: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddings {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        let body = json!({
            "text": text,
            "model": "sentence-transformers/all-MiniLM-L6-v2"
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("embedding service: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "embedding service: HTTP {}",
                response.status()
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("embedding service: {e}")))?;

        parse_vector(&result["embedding"])
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    dimensions: usize,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        let body = json!({
            "input": text,
            "model": "text-embedding-3-small"
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("openai embeddings: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "openai embeddings: HTTP {}",
                response.status()
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(format!("openai embeddings: {e}")))?;

        parse_vector(&result["data"][0]["embedding"])
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn parse_vector(value: &Value) -> CoreResult<Vec<f32>> {
    let array = value.as_array().ok_or_else(|| {
        CoreError::ProviderUnavailable("embedding response missing vector".to_string())
    })?;
    Ok(array
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_embeddings_parse_vector() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(json!({"embedding": [0.1, 0.2, 0.3]}).to_string())
            .create_async()
            .await;

        let provider = LocalEmbeddings::new(server.url(), 3);
        let vector = provider.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 3);
    }

    #[tokio::test]
    async fn unreachable_service_is_provider_unavailable() {
        let provider = LocalEmbeddings::new("http://127.0.0.1:1".to_string(), 3);
        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, CoreError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_response_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(json!({"unexpected": true}).to_string())
            .create_async()
            .await;

        let provider = LocalEmbeddings::new(server.url(), 3);
        assert!(provider.embed("hello").await.is_err());
    }
}
