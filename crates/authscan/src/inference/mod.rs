//! Generative-AI inference service abstraction.
//!
//! The pipeline treats the service as a black box from prompt (plus an
//! optional screenshot) to free-form text. The only implementation shipped
//! talks to the Gemini `generateContent` endpoint.

pub mod gemini;

use crate::error::InferenceError;
use async_trait::async_trait;

pub use gemini::GeminiClient;

/// A text-generation service.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Generate a response for `prompt`. `image` is a JPEG screenshot.
    async fn generate(&self, prompt: &str, image: Option<&[u8]>) -> Result<String, InferenceError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}
