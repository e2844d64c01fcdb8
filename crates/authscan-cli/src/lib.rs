//! Command implementations behind the `authscan` binary.
//!
//! Kept in a library so the output formatting and config overrides can be
//! tested without spawning a process.

use anyhow::{Context, Result};
use authscan::renderer::chromium::find_chromium;
use authscan::{AuthScanConfig, ComponentDetails, DetectionResult, Detector, EnginePool};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "authscan=info";

/// Install the global subscriber. Logs go to stderr so stdout stays
/// reserved for results.
pub fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "authscan=debug,authscan_cli=debug"
        } else {
            DEFAULT_LOG_FILTER
        })
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub no_ai: bool,
    pub offline_snippets: bool,
}

/// Load configuration and apply command-line overrides.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<AuthScanConfig> {
    let mut config = AuthScanConfig::load(path)?;
    apply_overrides(&mut config, overrides);
    Ok(config)
}

pub fn apply_overrides(config: &mut AuthScanConfig, overrides: Overrides) {
    if overrides.no_ai {
        config.inference.api_key = None;
    }
    if overrides.offline_snippets {
        config.resolver.live_resolution = false;
    }
}

/// Render `url` in Chromium and scan it.
pub async fn scan(config: AuthScanConfig, url: &str) -> DetectionResult {
    let pool = match find_chromium(config.browser.chromium_path.as_deref()) {
        Some(_) => EnginePool::chromium(config.browser.clone(), config.pool.clone()),
        None => {
            warn!("no Chromium found, live scans will fail; `offline` still works");
            EnginePool::without_browser(config.pool.clone())
        }
    };
    let reaper = pool.start_reaper();
    let detector = Detector::new(config);
    info!(ai = detector.ai_enabled(), "scanning {url}");

    let result = detector.scan_url(&pool, url).await;

    pool.shutdown().await;
    reaper.abort();
    result
}

/// Scan saved markup from a file, or from stdin when `source` is `-`.
pub fn scan_offline(config: AuthScanConfig, source: &str) -> Result<DetectionResult> {
    let markup = read_source(source)?;
    Ok(Detector::new(config).detect_offline(&markup))
}

fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut markup = String::new();
        std::io::stdin()
            .read_to_string(&mut markup)
            .context("failed to read markup from stdin")?;
        return Ok(markup);
    }
    std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))
}

/// Process exit status for a finished run.
pub fn exit_code(result: &DetectionResult) -> i32 {
    if result.success {
        0
    } else {
        1
    }
}

pub fn render_json(result: &DetectionResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize result")
}

/// Human-readable summary.
pub fn render_text(result: &DetectionResult) -> String {
    let mut out = String::new();
    let method = serde_json::to_value(result.detection_method)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();

    if let Some(url) = &result.url {
        out.push_str(&format!("  URL:     {url}\n"));
    }
    if let Some(title) = &result.title {
        out.push_str(&format!("  Title:   {title}\n"));
    }
    out.push_str(&format!("  Method:  {method}\n"));

    if !result.success {
        out.push_str(&format!(
            "  Failed:  {}\n",
            result.message.as_deref().unwrap_or("unknown error")
        ));
        return out;
    }
    if !result.found() {
        out.push_str("  No authentication UI found.\n");
        return out;
    }

    out.push_str(&format!("  Found {} component(s):\n", result.components().len()));
    for (i, component) in result.components().iter().enumerate() {
        let detail = match component.details() {
            ComponentDetails::Traditional { fields } => format!("fields: {}", fields.join(", ")),
            ComponentDetails::Oauth { providers } => {
                format!("providers: {}", providers.join(", "))
            }
            ComponentDetails::Passwordless { method } => format!("method: {method}"),
        };
        out.push_str(&format!("  {}. {} ({detail})\n", i + 1, component.kind()));
        if let Some(snippet) = component.snippet() {
            let first_line = snippet.lines().next().unwrap_or_default();
            out.push_str(&format!("     {}\n", preview(first_line, 100)));
        }
    }
    out
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}
