//! Gemini-backed [`TextModel`].

use super::{GenerationParams, ServiceError, TextModel};
use crate::config::ServiceSettings;
use async_trait::async_trait;
use ::gemini::{Gemini, Request};

/// Production model talking to the Gemini API.
pub struct GeminiModel {
    client: Gemini,
}

impl GeminiModel {
    pub fn new(client: Gemini) -> Self {
        Self { client }
    }

    /// Build a client for the configured key and model.
    pub fn from_settings(settings: &ServiceSettings) -> Self {
        Self::new(Gemini::new(&settings.api_key).with_model(&settings.model))
    }
}

#[async_trait]
impl TextModel for GeminiModel {
    async fn complete(&self, prompt: &str, params: GenerationParams) -> Result<String, ServiceError> {
        let request = Request::new(prompt)
            .with_max_output_tokens(params.max_output_tokens)
            .with_temperature(params.temperature);
        let response = self.client.generate(request).await?;
        tracing::debug!(
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            output_tokens = response.usage.output_tokens,
            "Gemini call finished"
        );
        Ok(response.text)
    }

    fn name(&self) -> &str {
        self.client.model()
    }
}
