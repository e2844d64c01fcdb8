//! Snippet resolver.
//!
//! Resolves every candidate against the live document: first its own
//! location description, then the type's fallback chain. All candidates of a
//! batch race one overall ceiling; whatever has not finished by then gets a
//! timeout placeholder. Abandoned attempts are not cancelled in the engine,
//! their results are just ignored.

pub mod strategies;

use crate::config::ResolverConfig;
use crate::heuristic::StaticAnalysis;
use crate::renderer::{LiveDocument, Locator};
use crate::sanitize::{sanitize_fragment, truncate_snippet};
use crate::types::{AuthComponent, ComponentDetails};
use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Duration;
use strategies::{fallback_chain, Strategy};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Snippet for candidates still pending when the batch ceiling expires.
pub const TIMEOUT_PLACEHOLDER: &str = "<!-- snippet unavailable: timed out -->";

/// Snippet for candidates no strategy could locate.
pub const NOT_FOUND_PLACEHOLDER: &str = "<!-- snippet unavailable: element not found -->";

/// How one candidate ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Raw outer markup of the matched element.
    Found(String),
    NotFound,
    TimedOut,
}

/// Resolves candidates against a live document.
#[derive(Debug, Clone, Default)]
pub struct SnippetResolver {
    config: ResolverConfig,
}

impl SnippetResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve and attach snippets for a whole batch.
    ///
    /// `markup` enables the static containment fallback for candidates the
    /// live document could not locate.
    pub async fn resolve_batch(
        &self,
        document: &dyn LiveDocument,
        components: &mut [AuthComponent],
        markup: Option<&str>,
    ) {
        let outcomes = self.race_batch(document, components).await;
        self.attach(components, outcomes, markup);
    }

    /// Run all candidates concurrently against the batch ceiling.
    pub async fn race_batch(
        &self,
        document: &dyn LiveDocument,
        components: &[AuthComponent],
    ) -> Vec<Resolution> {
        let deadline = Instant::now() + self.config.batch_ceiling();
        let mut outcomes = vec![Resolution::TimedOut; components.len()];

        let mut pending: FuturesUnordered<_> = components
            .iter()
            .enumerate()
            .map(|(index, component)| async move {
                (index, self.resolve_component(document, component).await)
            })
            .collect();

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((index, resolution))) => outcomes[index] = resolution,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        unresolved = pending.len(),
                        ceiling_ms = self.config.batch_ceiling_ms,
                        "snippet resolution hit the batch ceiling"
                    );
                    break;
                }
            }
        }
        outcomes
    }

    /// Primary description first, then the fallback chain.
    pub async fn resolve_component(
        &self,
        document: &dyn LiveDocument,
        component: &AuthComponent,
    ) -> Resolution {
        if let Some(locator) = component.selector.as_deref().and_then(Locator::parse) {
            if let Some(html) = attempt(document, &locator, self.config.primary_wait()).await {
                return Resolution::Found(html);
            }
            debug!(kind = %component.kind(), %locator, "primary location failed");
        }

        let chain = fallback_chain(component);
        let found = match component.details() {
            ComponentDetails::Oauth { .. } => {
                let sweep_end = Instant::now() + self.config.provider_sweep();
                self.run_chain(document, &chain, Some(sweep_end)).await
            }
            _ => self.run_chain(document, &chain, None).await,
        };

        match found {
            Some(html) => Resolution::Found(html),
            None => Resolution::NotFound,
        }
    }

    async fn run_chain(
        &self,
        document: &dyn LiveDocument,
        chain: &[Strategy],
        budget_end: Option<Instant>,
    ) -> Option<String> {
        for strategy in chain {
            let mut wait = self.config.attempt_wait();
            if let Some(end) = budget_end {
                let left = end.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    debug!(label = %strategy.label, "fallback budget exhausted");
                    return None;
                }
                wait = wait.min(left);
            }
            if let Some(html) = attempt(document, &strategy.locator, wait).await {
                debug!(label = %strategy.label, locator = %strategy.locator, "fallback matched");
                return Some(html);
            }
        }
        None
    }

    /// Turn outcomes into snippets. Synchronous so the parsed static DOM
    /// never lives across an await.
    fn attach(
        &self,
        components: &mut [AuthComponent],
        outcomes: Vec<Resolution>,
        markup: Option<&str>,
    ) {
        let analysis = markup
            .filter(|_| self.config.static_fallback)
            .filter(|_| outcomes.contains(&Resolution::NotFound))
            .map(|m| StaticAnalysis::parse(m, self.config.max_snippet_chars));

        for (component, outcome) in components.iter_mut().zip(outcomes) {
            let snippet = match outcome {
                Resolution::Found(html) => self.finish_snippet(&html),
                Resolution::TimedOut => TIMEOUT_PLACEHOLDER.to_string(),
                Resolution::NotFound => analysis
                    .as_ref()
                    .and_then(|a| a.snippet_for(component))
                    .unwrap_or_else(|| NOT_FOUND_PLACEHOLDER.to_string()),
            };
            component.attach_snippet(snippet);
        }
    }

    /// Sanitize and cap live markup.
    pub fn finish_snippet(&self, outer_html: &str) -> String {
        truncate_snippet(&sanitize_fragment(outer_html), self.config.max_snippet_chars)
    }
}

/// One time-boxed resolve call. Errors and timeouts count as misses.
async fn attempt(document: &dyn LiveDocument, locator: &Locator, wait: Duration) -> Option<String> {
    match tokio::time::timeout(wait, document.resolve(locator, wait)).await {
        Ok(Ok(resolved)) => resolved.usable_markup(),
        Ok(Err(e)) => {
            debug!(%locator, "resolve failed: {e:#}");
            None
        }
        Err(_) => {
            debug!(%locator, wait_ms = wait.as_millis() as u64, "resolve timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::ResolvedElement;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers only the locators it knows, after an optional delay.
    #[derive(Default)]
    struct ScriptedDocument {
        answers: HashMap<String, String>,
        delay: Duration,
        asked: Mutex<Vec<String>>,
    }

    impl ScriptedDocument {
        fn answering(pairs: &[(&str, &str)]) -> Self {
            Self {
                answers: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl LiveDocument for ScriptedDocument {
        async fn url(&self) -> anyhow::Result<String> {
            Ok("https://example.com".into())
        }

        async fn content(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }

        async fn resolve(&self, locator: &Locator, _wait: Duration) -> anyhow::Result<ResolvedElement> {
            let key = locator.to_string();
            self.asked.lock().unwrap().push(key.clone());
            tokio::time::sleep(self.delay).await;
            Ok(match self.answers.get(&key) {
                Some(html) => ResolvedElement {
                    exists: true,
                    visible: true,
                    outer_html: Some(html.clone()),
                },
                None => ResolvedElement::default(),
            })
        }
    }

    fn with_selector(mut component: AuthComponent, selector: &str) -> AuthComponent {
        component.selector = Some(selector.to_string());
        component
    }

    #[tokio::test]
    async fn test_primary_selector_wins() {
        let doc = ScriptedDocument::answering(&[(
            "css=form#login",
            r#"<form id="login"><script>x()</script><input type="password"></form>"#,
        )]);
        let mut batch = vec![with_selector(
            AuthComponent::traditional(vec!["password".into()]),
            "css=form#login",
        )];

        SnippetResolver::default()
            .resolve_batch(&doc, &mut batch, None)
            .await;

        let snippet = batch[0].snippet().unwrap();
        assert!(snippet.starts_with(r#"<form id="login">"#));
        assert!(!snippet.contains("<script"));
        assert_eq!(doc.asked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_through_provider_variants() {
        let target = Locator::control_with_text("Continue with Google").to_string();
        let doc = ScriptedDocument::answering(&[(&target, "<button>Continue with Google</button>")]);
        let mut batch = vec![with_selector(
            AuthComponent::oauth(vec!["google".into()]),
            "the google button",
        )];

        SnippetResolver::default()
            .resolve_batch(&doc, &mut batch, None)
            .await;

        assert_eq!(batch[0].snippet(), Some("<button>Continue with Google</button>"));
        // Unparseable prose goes straight to the chain: "Google", "Sign in with Google", then the hit.
        assert_eq!(doc.asked.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_not_found_uses_static_markup_then_placeholder() {
        let doc = ScriptedDocument::default();
        let markup = r#"<html><body><div class="login-box"><form action="/s"><input type="email"><input type="password"></form></div></body></html>"#;
        let mut batch = vec![
            AuthComponent::traditional(vec!["email".into(), "password".into()]),
            AuthComponent::passwordless("passkey"),
        ];

        SnippetResolver::default()
            .resolve_batch(&doc, &mut batch, Some(markup))
            .await;

        assert!(batch[0].snippet().unwrap().starts_with(r#"<form action="/s">"#));
        assert_eq!(batch[1].snippet(), Some(NOT_FOUND_PLACEHOLDER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_ceiling_bounds_slow_document() {
        let doc = ScriptedDocument {
            delay: Duration::from_secs(600),
            ..ScriptedDocument::default()
        };
        let config = ResolverConfig {
            batch_ceiling_ms: 2_000,
            ..ResolverConfig::default()
        };
        let mut batch = vec![
            AuthComponent::traditional(vec![]),
            AuthComponent::oauth(vec!["apple".into()]),
        ];

        let started = Instant::now();
        SnippetResolver::new(config)
            .resolve_batch(&doc, &mut batch, None)
            .await;

        assert!(started.elapsed() <= Duration::from_millis(2_100));
        for component in &batch {
            assert_eq!(component.snippet(), Some(TIMEOUT_PLACEHOLDER));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_sweep_budget() {
        let doc = ScriptedDocument {
            delay: Duration::from_secs(600),
            ..ScriptedDocument::default()
        };
        let resolver = SnippetResolver::default();
        let component = AuthComponent::oauth(vec!["google".into(), "apple".into(), "github".into()]);

        let started = Instant::now();
        let outcome = resolver.resolve_component(&doc, &component).await;

        assert_eq!(outcome, Resolution::NotFound);
        // 3s per attempt, cut off by the 12s sweep.
        assert!(started.elapsed() <= Duration::from_secs(12));
        assert_eq!(doc.asked.lock().unwrap().len(), 4);
    }
}
