//! Retrying wrapper around a [`TextModel`].

use super::{GenerationFailure, GenerationParams, ServiceError, TextModel};
use std::time::Duration;
use tracing::{info, warn};

/// How a failed call is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Wait before the single retry.
    pub cooldown: Duration,
    /// Multiplier applied to the temperature on the retry.
    pub temperature_factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            temperature_factor: 0.9,
        }
    }
}

impl RetryPolicy {
    /// No waiting; for tests.
    pub fn immediate() -> Self {
        Self {
            cooldown: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Client every phase uses to talk to the service.
///
/// A failed call is retried exactly once, after [`RetryPolicy::cooldown`],
/// at a slightly lower temperature. Holds no mutable state.
pub struct ContentClient {
    model: Box<dyn TextModel>,
    max_output_tokens: usize,
    temperature: f32,
    retry: RetryPolicy,
}

impl ContentClient {
    pub fn new(model: impl TextModel + 'static) -> Self {
        Self {
            model: Box::new(model),
            max_output_tokens: 4096,
            temperature: 0.7,
            retry: RetryPolicy::default(),
        }
    }

    /// Output ceiling used when a call does not ask for one.
    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Generate text for `prompt`.
    pub async fn generate(
        &self,
        prompt: &str,
        max_output_tokens: Option<usize>,
    ) -> Result<String, GenerationFailure> {
        if prompt.trim().is_empty() {
            return Err(GenerationFailure {
                attempts: 0,
                source: ServiceError::EmptyPrompt,
            });
        }

        let params = GenerationParams {
            max_output_tokens: max_output_tokens.unwrap_or(self.max_output_tokens),
            temperature: self.temperature,
        };

        match self.model.complete(prompt, params).await {
            Ok(text) => return Ok(text),
            Err(e) => {
                warn!(model = self.model.name(), error = %e, "Service call failed");
                info!(cooldown = ?self.retry.cooldown, "Retrying after cooldown");
            }
        }

        tokio::time::sleep(self.retry.cooldown).await;

        let retry_params = GenerationParams {
            temperature: params.temperature * self.retry.temperature_factor,
            ..params
        };
        self.model
            .complete(prompt, retry_params)
            .await
            .map_err(|source| {
                warn!(model = self.model.name(), error = %source, "Retry failed too");
                GenerationFailure {
                    attempts: 2,
                    source,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedModel};

    fn client(model: &ScriptedModel) -> ContentClient {
        ContentClient::new(model.clone())
            .with_temperature(0.5)
            .with_retry_policy(RetryPolicy::immediate())
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let model = ScriptedModel::new().with_default(Reply::text("hello"));
        let text = client(&model).generate("prompt", None).await.unwrap();

        assert_eq!(text, "hello");
        assert_eq!(model.call_count(), 1);
        assert_eq!(model.calls()[0].max_output_tokens, 4096);
    }

    #[tokio::test]
    async fn test_single_retry_lowers_temperature() {
        let model = ScriptedModel::new()
            .then(Reply::fail("503"))
            .then(Reply::text("second time lucky"));
        let text = client(&model).generate("prompt", Some(8192)).await.unwrap();

        assert_eq!(text, "second time lucky");
        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].temperature, 0.5);
        assert!((calls[1].temperature - 0.45).abs() < 1e-6);
        assert_eq!(calls[1].max_output_tokens, 8192);
    }

    #[tokio::test]
    async fn test_failure_after_one_retry() {
        let model = ScriptedModel::new().with_default(Reply::fail("down"));
        let err = client(&model).generate("prompt", None).await.unwrap_err();

        assert_eq!(err.attempts, 2);
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_prompt_not_sent() {
        let model = ScriptedModel::new();
        let err = client(&model).generate("   ", None).await.unwrap_err();

        assert!(matches!(err.source, ServiceError::EmptyPrompt));
        assert_eq!(model.call_count(), 0);
    }
}
