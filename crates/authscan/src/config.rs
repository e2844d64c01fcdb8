//! Configuration loading and resolution.
//!
//! Defaults are compiled in; a JSON file and environment variables can
//! override them. Durations are expressed in milliseconds in the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for a detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthScanConfig {
    pub inference: InferenceConfig,
    pub excerpt: ExcerptConfig,
    pub resolver: ResolverConfig,
    pub browser: BrowserConfig,
    pub pool: PoolConfig,
}

/// Generative-AI service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// API key. `None` disables the AI-assisted path.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
    /// Send a page screenshot along with the prompt.
    pub send_screenshot: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_ms: 60_000,
            send_screenshot: true,
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Bounds for the evidence excerpt sent to the inference service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcerptConfig {
    pub max_chars: usize,
    pub min_chars: usize,
}

impl Default for ExcerptConfig {
    fn default() -> Self {
        Self {
            max_chars: 15_000,
            min_chars: 20,
        }
    }
}

/// Time and size budgets for snippet resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Wait for the primary location description.
    pub primary_wait_ms: u64,
    /// Wait for each fallback strategy.
    pub attempt_wait_ms: u64,
    /// Total budget for the OAuth provider sweep.
    pub provider_sweep_ms: u64,
    /// Ceiling for resolving a whole batch of candidates.
    pub batch_ceiling_ms: u64,
    pub max_snippet_chars: usize,
    /// Try heuristic containment on the static markup before giving up.
    pub static_fallback: bool,
    /// Resolve snippets in the live page. When off, snippets come from the
    /// static markup only.
    pub live_resolution: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            primary_wait_ms: 8_000,
            attempt_wait_ms: 3_000,
            provider_sweep_ms: 12_000,
            batch_ceiling_ms: 35_000,
            max_snippet_chars: 1_500,
            static_fallback: true,
            live_resolution: true,
        }
    }
}

impl ResolverConfig {
    pub fn primary_wait(&self) -> Duration {
        Duration::from_millis(self.primary_wait_ms)
    }

    pub fn attempt_wait(&self) -> Duration {
        Duration::from_millis(self.attempt_wait_ms)
    }

    pub fn provider_sweep(&self) -> Duration {
        Duration::from_millis(self.provider_sweep_ms)
    }

    pub fn batch_ceiling(&self) -> Duration {
        Duration::from_millis(self.batch_ceiling_ms)
    }
}

/// Navigation and capture settings for live scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub chromium_path: Option<PathBuf>,
    pub navigation_timeout_ms: u64,
    /// Extra settle time after load before capturing.
    pub settle_ms: u64,
    pub screenshot_quality: i64,
    pub screenshot_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chromium_path: None,
            navigation_timeout_ms: 30_000,
            settle_ms: 1_500,
            screenshot_quality: 60,
            screenshot_timeout_ms: 10_000,
        }
    }
}

/// Engine pool lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub idle_timeout_ms: u64,
    pub reap_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 5 * 60 * 1000,
            reap_interval_ms: 30_000,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

impl AuthScanConfig {
    /// Load from an explicit file (if any), then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// Environment overrides: API key, model and Chromium path.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("AUTHSCAN_GEMINI_API_KEY").or_else(|| non_empty("GEMINI_API_KEY")) {
            self.inference.api_key = Some(key);
        }
        if let Some(model) = non_empty("AUTHSCAN_MODEL") {
            self.inference.model = model;
        }
        if let Some(path) = non_empty("AUTHSCAN_CHROMIUM_PATH") {
            self.browser.chromium_path = Some(PathBuf::from(path));
        }
    }

    /// Whether the AI-assisted path can run at all.
    pub fn ai_enabled(&self) -> bool {
        self.inference.api_key.is_some()
    }
}
