//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). Detection only
//! needs the read-only [`LiveDocument`] subset, which tests implement
//! directly.

pub mod chromium;
pub mod locator;

pub use locator::Locator;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Outcome of evaluating a [`Locator`] in the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedElement {
    pub exists: bool,
    pub visible: bool,
    #[serde(rename = "outerHTML")]
    pub outer_html: Option<String>,
}

impl ResolvedElement {
    /// A visible element with some markup.
    pub fn usable_markup(self) -> Option<String> {
        match self.outer_html {
            Some(html) if self.exists && self.visible && !html.trim().is_empty() => Some(html),
            _ => None,
        }
    }
}

/// Read-only view of a rendered document.
#[async_trait]
pub trait LiveDocument: Send + Sync {
    /// Current URL. Failure means the handle is unusable.
    async fn url(&self) -> Result<String>;
    /// Full serialized markup.
    async fn content(&self) -> Result<String>;
    /// Poll for a visible match of `locator` until `wait` elapses.
    async fn resolve(&self, locator: &Locator, wait: Duration) -> Result<ResolvedElement>;
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new isolated browser context with one page.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single isolated browser context (own cookies and storage) for one request.
#[async_trait]
pub trait RenderContext: LiveDocument {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult>;
    /// Document title, if any.
    async fn title(&self) -> Result<Option<String>>;
    /// JPEG screenshot of the viewport.
    async fn screenshot(&self, quality: i64, timeout: Duration) -> Result<Vec<u8>>;
    /// This context as a plain document handle.
    fn as_document(&self) -> &dyn LiveDocument;
    /// Close the page, then dispose of the browser context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A no-op renderer used when Chromium is unavailable.
///
/// Live scans fail with a pool error; offline detection still works.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Err(anyhow::anyhow!("Browser not available, offline mode only"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_element_wire_shape() {
        let parsed: ResolvedElement = serde_json::from_str(
            r#"{"exists": true, "visible": false, "outerHTML": "<button>Go</button>"}"#,
        )
        .unwrap();
        assert!(parsed.exists);
        assert_eq!(parsed.clone().usable_markup(), None);

        let visible = ResolvedElement {
            visible: true,
            ..parsed
        };
        assert_eq!(
            visible.usable_markup().as_deref(),
            Some("<button>Go</button>")
        );
        assert_eq!(
            serde_json::from_str::<ResolvedElement>(
                r#"{"exists": false, "visible": false, "outerHTML": null}"#
            )
            .unwrap(),
            ResolvedElement::default()
        );
    }

    #[tokio::test]
    async fn test_noop_renderer_refuses_contexts() {
        let renderer = NoopRenderer;
        assert!(renderer.new_context().await.is_err());
        assert!(renderer.shutdown().await.is_ok());
        assert_eq!(renderer.active_contexts(), 0);
    }
}
