//! Access to the generative text service.
//!
//! [`TextModel`] is the seam between the pipeline and a concrete provider
//! (Gemini in production, [`crate::testing::ScriptedModel`] in tests).
//! [`ContentClient`] wraps a model with the one-retry policy every caller
//! relies on.

mod client;
mod gemini;

pub use client::{ContentClient, RetryPolicy};
pub use gemini::GeminiModel;

use async_trait::async_trait;
use thiserror::Error;

/// Sampling settings for a single call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_output_tokens: usize,
    pub temperature: f32,
}

/// A transport-level failure from one service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Gemini error: {0}")]
    Gemini(#[from] ::gemini::Error),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Prompt is empty")]
    EmptyPrompt,
}

/// The service failed on the first try and again on the retry.
#[derive(Debug, Error)]
#[error("Generation failed after {attempts} attempt(s): {source}")]
pub struct GenerationFailure {
    pub attempts: usize,
    #[source]
    pub source: ServiceError,
}

/// A provider that turns a prompt into text.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Issue one call. No retries at this level.
    async fn complete(&self, prompt: &str, params: GenerationParams) -> Result<String, ServiceError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}
