//! AI-assisted detector.
//!
//! Builds a keyword-filtered excerpt of the page, asks the inference service
//! to classify the auth UI in it, and parses the answer into candidate
//! components. Every failure (timeout, transport, malformed output) is
//! returned as an [`AiPathError`] so the caller can switch to the pattern
//! detector for the whole request.

pub mod excerpt;
pub mod prompt;
pub mod response;

use crate::config::{ExcerptConfig, InferenceConfig};
use crate::error::{AiPathError, InferenceError};
use crate::inference::InferenceService;
use crate::types::AuthComponent;
use std::sync::Arc;
use tracing::{debug, info};

pub use excerpt::build_excerpt;
pub use prompt::build_prompt;
pub use response::parse_response;

/// Classifies auth UI through an inference service.
pub struct AiDetector {
    service: Arc<dyn InferenceService>,
    inference: InferenceConfig,
    excerpt: ExcerptConfig,
}

impl AiDetector {
    pub fn new(
        service: Arc<dyn InferenceService>,
        inference: InferenceConfig,
        excerpt: ExcerptConfig,
    ) -> Self {
        Self {
            service,
            inference,
            excerpt,
        }
    }

    /// Detect candidates in `markup`. The screenshot is sent only when the
    /// configuration allows it.
    pub async fn detect(
        &self,
        markup: &str,
        url: &str,
        screenshot: Option<&[u8]>,
    ) -> Result<Vec<AuthComponent>, AiPathError> {
        let excerpt = build_excerpt(markup, &self.excerpt);
        let image = screenshot.filter(|_| self.inference.send_screenshot);
        let prompt = build_prompt(url, &excerpt, image.is_some());
        debug!(
            service = self.service.name(),
            excerpt_chars = excerpt.len(),
            with_image = image.is_some(),
            "querying inference service"
        );

        let timeout = self.inference.timeout();
        let text = tokio::time::timeout(timeout, self.service.generate(&prompt, image))
            .await
            .map_err(|_| InferenceError::Timeout(timeout.as_secs()))??;

        let components = parse_response(&text)?;
        info!(count = components.len(), "inference classified components");
        Ok(components)
    }
}
