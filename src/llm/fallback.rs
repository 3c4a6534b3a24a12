use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{GenerationRequest, GenerationResult, LLMProvider};
use crate::shared::errors::{CoreError, CoreResult};

/// Wraps the primary provider with the per-request deadline and a single
/// fallback retry. Fallback usage is recorded on the result so callers can
/// treat substituted answers differently.
pub struct FallbackChain {
    primary: Arc<dyn LLMProvider>,
    fallback: Option<Arc<dyn LLMProvider>>,
    fallback_model: Option<String>,
    timeout: Duration,
}

impl FallbackChain {
    pub fn new(
        primary: Arc<dyn LLMProvider>,
        fallback: Option<Arc<dyn LLMProvider>>,
        fallback_model: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            fallback_model,
            timeout,
        }
    }

    pub async fn generate(&self, request: &GenerationRequest) -> CoreResult<GenerationResult> {
        let requested_model = request.model.clone();
        let started = Instant::now();

        match self.attempt(&self.primary, request).await {
            Ok(output) => Ok(GenerationResult {
                content: output.content,
                model: output.model,
                requested_model,
                tokens_prompt: output.tokens_prompt,
                tokens_completion: output.tokens_completion,
                generation_time_ms: started.elapsed().as_millis() as i64,
                used_fallback: false,
            }),
            Err(primary_err) => {
                let Some(fallback) = &self.fallback else {
                    return Err(primary_err);
                };
                warn!(
                    "primary provider {} failed ({}), retrying on {}",
                    self.primary.name(),
                    primary_err,
                    fallback.name()
                );

                let mut fallback_request = request.clone();
                if let Some(model) = &self.fallback_model {
                    fallback_request.model = model.clone();
                }

                let output = self.attempt(fallback, &fallback_request).await?;
                info!(
                    "fallback {} answered for requested model {}",
                    fallback.name(),
                    requested_model
                );
                Ok(GenerationResult {
                    content: output.content,
                    model: output.model,
                    requested_model,
                    tokens_prompt: output.tokens_prompt,
                    tokens_completion: output.tokens_completion,
                    generation_time_ms: started.elapsed().as_millis() as i64,
                    used_fallback: true,
                })
            }
        }
    }

    async fn attempt(
        &self,
        provider: &Arc<dyn LLMProvider>,
        request: &GenerationRequest,
    ) -> CoreResult<super::GenerationOutput> {
        match tokio::time::timeout(self.timeout, provider.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::ProviderUnavailable(format!(
                "{}: timed out after {:?}",
                provider.name(),
                self.timeout
            ))),
        }
    }
}
