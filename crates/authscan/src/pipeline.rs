//! Detection pipeline.
//!
//! Candidates come from the AI-assisted detector when an inference service
//! is configured, otherwise (or when that path fails in any way) from the
//! pattern detector. An empty AI answer also falls through to patterns, and
//! when those find nothing the element scorer gets a last look at the static
//! markup. Candidates are then resolved against the live page, deduplicated
//! and wrapped in a [`DetectionResult`]. Only an unusable document handle, a
//! failed navigation or an unavailable engine produce `success: false`.

use crate::ai::AiDetector;
use crate::config::AuthScanConfig;
use crate::dedup::dedup_components;
use crate::error::PipelineError;
use crate::heuristic::StaticAnalysis;
use crate::inference::{GeminiClient, InferenceService};
use crate::pattern::detect_patterns;
use crate::pool::EnginePool;
use crate::renderer::{LiveDocument, RenderContext};
use crate::resolver::{SnippetResolver, NOT_FOUND_PLACEHOLDER};
use crate::types::{AuthComponent, DetectionMethod, DetectionResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// Runs detection requests; one instance serves any number of them.
pub struct Detector {
    config: AuthScanConfig,
    ai: Option<AiDetector>,
    resolver: SnippetResolver,
}

impl Detector {
    /// Build from configuration. The AI path is enabled when an API key is set.
    pub fn new(config: AuthScanConfig) -> Self {
        let ai = if config.ai_enabled() {
            match GeminiClient::from_config(&config.inference) {
                Ok(client) => Some(AiDetector::new(
                    Arc::new(client),
                    config.inference.clone(),
                    config.excerpt.clone(),
                )),
                Err(e) => {
                    warn!("AI detection disabled: {e}");
                    None
                }
            }
        } else {
            None
        };
        Self::assemble(config, ai)
    }

    /// Build with an explicit inference service.
    pub fn with_inference(config: AuthScanConfig, service: Arc<dyn InferenceService>) -> Self {
        let ai = AiDetector::new(service, config.inference.clone(), config.excerpt.clone());
        Self::assemble(config, Some(ai))
    }

    fn assemble(config: AuthScanConfig, ai: Option<AiDetector>) -> Self {
        let resolver = SnippetResolver::new(config.resolver.clone());
        Self {
            config,
            ai,
            resolver,
        }
    }

    pub fn config(&self) -> &AuthScanConfig {
        &self.config
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai.is_some()
    }

    /// Detect auth UI in an already rendered page.
    pub async fn detect(
        &self,
        markup: &str,
        url: &str,
        screenshot: Option<&[u8]>,
        document: &dyn LiveDocument,
    ) -> DetectionResult {
        let span = info_span!("detect", request_id = %Uuid::new_v4(), url);
        self.detect_in(markup, url, screenshot, document)
            .instrument(span)
            .await
    }

    /// Navigate to `url` in a pooled context and detect auth UI there.
    ///
    /// Malformed or non-web URLs fail before the engine is touched. The
    /// context is closed on every path; a failed close is only logged.
    pub async fn scan_url(&self, pool: &Arc<EnginePool>, url: &str) -> DetectionResult {
        let span = info_span!("scan", request_id = %Uuid::new_v4(), url);
        async {
            match Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https" | "file" | "data") => {}
                Ok(parsed) => {
                    let reason = format!("unsupported scheme {:?}", parsed.scheme());
                    return self.failure(PipelineError::Navigation(reason), url);
                }
                Err(e) => {
                    return self.failure(PipelineError::Navigation(format!("invalid URL: {e}")), url)
                }
            }

            let mut lease = match pool.acquire().await {
                Ok(lease) => lease,
                Err(e) => return self.failure(PipelineError::from(e), url),
            };

            let result = self.scan_in(lease.context_mut(), url).await;

            if let Err(e) = lease.close().await {
                warn!("context cleanup failed: {e:#}");
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Detect without a browser or inference service: pattern candidates,
    /// static-DOM snippets.
    pub fn detect_offline(&self, markup: &str) -> DetectionResult {
        let _span = info_span!("offline", request_id = %Uuid::new_v4()).entered();
        let mut components = detect_patterns(markup);
        debug!(count = components.len(), "pattern candidates");
        if components.is_empty() {
            components = self.scored_candidates(markup);
        }
        attach_static_snippets(&mut components, markup, self.config.resolver.max_snippet_chars);
        self.finish(components, DetectionMethod::Pattern, markup)
    }

    async fn scan_in(&self, context: &mut dyn RenderContext, url: &str) -> DetectionResult {
        let browser = &self.config.browser;

        let final_url = match context
            .navigate(url, Duration::from_millis(browser.navigation_timeout_ms))
            .await
        {
            Ok(nav) => {
                info!(final_url = %nav.final_url, load_ms = nav.load_time_ms, "page loaded");
                nav.final_url
            }
            Err(e) => {
                // A slow page may still have rendered enough to inspect.
                let current = context.url().await.unwrap_or_default();
                if current.is_empty() || current == "about:blank" {
                    return self.failure(PipelineError::Navigation(format!("{e:#}")), url);
                }
                warn!("navigation incomplete, scanning partial page: {e:#}");
                current
            }
        };
        tokio::time::sleep(Duration::from_millis(browser.settle_ms)).await;

        let context: &dyn RenderContext = context;
        let (content, title, screenshot) = tokio::join!(
            context.content(),
            context.title(),
            self.capture_screenshot(context)
        );

        let markup = match content {
            Ok(markup) => markup,
            Err(e) => {
                return self.failure(PipelineError::DocumentUnavailable(format!("{e:#}")), url)
            }
        };
        let title = title.unwrap_or_else(|e| {
            debug!("no title: {e:#}");
            None
        });

        let mut result = self
            .detect_in(&markup, &final_url, screenshot.as_deref(), context.as_document())
            .await;
        result.title = title;
        result
    }

    async fn capture_screenshot(&self, context: &dyn RenderContext) -> Option<Vec<u8>> {
        if self.ai.is_none() || !self.config.inference.send_screenshot {
            return None;
        }
        let browser = &self.config.browser;
        match context
            .screenshot(
                browser.screenshot_quality,
                Duration::from_millis(browser.screenshot_timeout_ms),
            )
            .await
        {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("continuing without screenshot: {e:#}");
                None
            }
        }
    }

    async fn detect_in(
        &self,
        markup: &str,
        url: &str,
        screenshot: Option<&[u8]>,
        document: &dyn LiveDocument,
    ) -> DetectionResult {
        if let Err(e) = document.url().await {
            return self.failure(PipelineError::DocumentUnavailable(format!("{e:#}")), url);
        }

        let (mut components, method) = self.candidates(markup, url, screenshot).await;
        info!(count = components.len(), ?method, "candidates detected");

        if self.config.resolver.live_resolution {
            self.resolver
                .resolve_batch(document, &mut components, Some(markup))
                .await;
        } else {
            attach_static_snippets(&mut components, markup, self.config.resolver.max_snippet_chars);
        }

        self.finish(components, method, markup).with_url(url)
    }

    /// AI path first; any failure switches the whole request to patterns.
    /// An empty candidate list from either path falls through to the scorer.
    async fn candidates(
        &self,
        markup: &str,
        url: &str,
        screenshot: Option<&[u8]>,
    ) -> (Vec<AuthComponent>, DetectionMethod) {
        let mut ai_answered = false;
        if let Some(ai) = &self.ai {
            match ai.detect(markup, url, screenshot).await {
                Ok(components) if !components.is_empty() => {
                    return (components, DetectionMethod::Ai)
                }
                Ok(_) => {
                    debug!("AI found no candidates, trying patterns and the scorer");
                    ai_answered = true;
                }
                Err(e) => warn!("AI detection failed, using pattern matching: {e}"),
            }
        }

        let mut components = detect_patterns(markup);
        if components.is_empty() {
            components = self.scored_candidates(markup);
        }
        let method = if components.is_empty() && ai_answered {
            DetectionMethod::Ai
        } else {
            DetectionMethod::Pattern
        };
        (components, method)
    }

    fn scored_candidates(&self, markup: &str) -> Vec<AuthComponent> {
        StaticAnalysis::parse(markup, self.config.resolver.max_snippet_chars).components()
    }

    fn finish(
        &self,
        components: Vec<AuthComponent>,
        method: DetectionMethod,
        markup: &str,
    ) -> DetectionResult {
        let before = components.len();
        let components = dedup_components(components);
        let mut result = DetectionResult::completed(components, method);

        if result.found() {
            result.widget_snippet =
                StaticAnalysis::parse(markup, self.config.resolver.max_snippet_chars)
                    .widget_snippet();
        }

        info!(
            found = result.found(),
            count = result.components().len(),
            duplicates = before - result.components().len(),
            ?method,
            "detection finished"
        );
        result
    }

    fn failure(&self, error: PipelineError, url: &str) -> DetectionResult {
        warn!("detection failed: {error}");
        let method = if self.ai.is_some() {
            DetectionMethod::Ai
        } else {
            DetectionMethod::Pattern
        };
        DetectionResult::failure(error.to_string(), method).with_url(url)
    }
}

/// Offline detection with default settings.
pub fn detect_offline(markup: &str) -> DetectionResult {
    Detector::new(AuthScanConfig::default()).detect_offline(markup)
}

fn attach_static_snippets(components: &mut [AuthComponent], markup: &str, max_chars: usize) {
    if components.is_empty() {
        return;
    }
    let analysis = StaticAnalysis::parse(markup, max_chars);
    for component in components.iter_mut() {
        let snippet = analysis
            .snippet_for(component)
            .unwrap_or_else(|| NOT_FOUND_PLACEHOLDER.to_string());
        component.attach_snippet(snippet);
    }
}
