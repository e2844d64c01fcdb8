//! Chromium-based renderer using chromiumoxide.

use super::{LiveDocument, Locator, NavigationResult, RenderContext, Renderer, ResolvedElement};
use crate::config::BrowserConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::browser::{BrowserContextId, CloseParams};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Interval between locator evaluations while waiting for visibility.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    // 1. Configured path (file or AUTHSCAN_CHROMIUM_PATH)
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        warn!(path = %path.display(), "configured Chromium path does not exist");
    }

    // 2. ~/.authscan/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".authscan/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".authscan/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".authscan/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".authscan/chromium/chrome-linux64/chrome"),
                home.join(".authscan/chromium/chrome"),
            ]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 3. System PATH
    for binary in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(binary) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer. One browser process, one browser context per
/// request.
pub struct ChromiumRenderer {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let chrome_path = find_chromium(config.chromium_path.as_deref()).context(
            "Chromium not found. Install Chrome or set AUTHSCAN_CHROMIUM_PATH.",
        )?;
        debug!(path = %chrome_path.display(), "launching Chromium");

        let launch = LaunchConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(launch)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            handler,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let created = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .context("failed to create browser context")?;
        let context_id = created.result.browser_context_id.clone();

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("invalid target params: {e}"))?;

        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                dispose_context(&self.browser, context_id).await;
                bail!("failed to create new page: {e}");
            }
        };

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            context_id,
            browser: Arc::clone(&self.browser),
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // The connection drops as the browser exits, so the reply may never come.
        if let Err(e) = self.browser.execute(CloseParams::default()).await {
            debug!("browser close: {e}");
        }
        self.handler.abort();
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        warn!("failed to dispose browser context: {e}");
    }
}

/// One page inside its own browser context.
pub struct ChromiumContext {
    page: Page,
    context_id: BrowserContextId,
    browser: Arc<Browser>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumContext {
    async fn evaluate_once(&self, script: &str) -> Result<ResolvedElement> {
        self.page
            .evaluate(script)
            .await
            .context("locator evaluation failed")?
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert locator result: {e:?}"))
    }
}

#[async_trait]
impl LiveDocument for ChromiumContext {
    async fn url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .unwrap_or_default();
        Ok(url)
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn resolve(&self, locator: &Locator, wait: Duration) -> Result<ResolvedElement> {
        let script = locator.resolve_script();
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let found = self.evaluate_once(&script).await?;
            let now = tokio::time::Instant::now();
            if found.visible || now >= deadline {
                return Ok(found);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, self.page.goto(url)).await;

        match result {
            Ok(Ok(_)) => {
                // Load completion shares the navigation budget.
                let remaining = timeout.saturating_sub(start.elapsed());
                match tokio::time::timeout(remaining, self.page.wait_for_navigation()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => debug!("load wait failed: {e}"),
                    Err(_) => warn!(
                        budget_ms = timeout.as_millis() as u64,
                        "page still loading when navigation budget ran out"
                    ),
                }

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms: start.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {}ms", timeout.as_millis()),
        }
    }

    async fn title(&self) -> Result<Option<String>> {
        self.page.get_title().await.context("failed to get title")
    }

    async fn screenshot(&self, quality: i64, timeout: Duration) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(quality)
            .build();
        match tokio::time::timeout(timeout, self.page.screenshot(params)).await {
            Ok(bytes) => bytes.context("screenshot failed"),
            Err(_) => bail!("screenshot timed out after {}ms", timeout.as_millis()),
        }
    }

    fn as_document(&self) -> &dyn LiveDocument {
        self
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let ChromiumContext {
            page,
            context_id,
            browser,
            ..
        } = *self;
        let closed = page.close().await;
        dispose_context(&browser, context_id).await;
        closed.context("failed to close page")
    }
}
