//! Static-DOM snippet extraction.
//!
//! Works on parsed markup only: scores every element, picks the best hits per
//! category and resolves their containers. Serves as the offline detector's
//! snippet source and as the last resort before a not-found placeholder in
//! live mode.
//!
//! `Html` is `!Send`; a [`StaticAnalysis`] must be created and dropped
//! without an await in between.

use crate::containment::{
    closest_container, common_container, PAGE_CONTAINER_MAX_TEXT, SINGLE_CONTAINER_MAX_TEXT,
};
use crate::pattern::extract_field_names;
use crate::renderer::locator::CONTROL_SELECTOR;
use crate::sanitize::{sanitize_element, truncate_snippet};
use crate::scoring::{is_interactive, rank_elements, text_prefix, ElementKind};
use crate::types::{AuthComponent, ComponentDetails, AUTH_WIDGET_TAG, OAUTH_PROVIDERS};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Separates independently resolved containers in a combined snippet.
pub const OAUTH_SECTION_LABEL: &str = "<!-- oauth providers -->";

/// Accepted hits of one ranking pass, best first within each category.
struct Hits<'a> {
    credential: Vec<ElementRef<'a>>,
    action: Vec<ElementRef<'a>>,
    oauth: Vec<(ElementRef<'a>, &'static str)>,
}

/// A parsed document ready for containment queries.
pub struct StaticAnalysis {
    document: Html,
    max_chars: usize,
}

impl StaticAnalysis {
    pub fn parse(markup: &str, max_chars: usize) -> Self {
        Self {
            document: Html::parse_document(markup),
            max_chars,
        }
    }

    fn hits(&self) -> Hits<'_> {
        let mut hits = Hits {
            credential: Vec::new(),
            action: Vec::new(),
            oauth: Vec::new(),
        };
        for scored in rank_elements(&self.document) {
            if !scored.score.is_accepted() {
                continue;
            }
            match (scored.score.kind, scored.score.brand) {
                (ElementKind::Credential, _) => hits.credential.push(scored.element),
                (ElementKind::Action, _) => hits.action.push(scored.element),
                (ElementKind::OAuth, Some(brand)) => hits.oauth.push((scored.element, brand)),
                _ => {}
            }
        }
        hits
    }

    /// Components inferred from scored elements alone.
    ///
    /// Credential and action hits make one traditional component; provider
    /// buttons make one OAuth component listing their brands in table order.
    pub fn components(&self) -> Vec<AuthComponent> {
        let hits = self.hits();
        let mut components = Vec::new();

        if !hits.credential.is_empty() || !hits.action.is_empty() {
            let mut fields: Vec<String> = Vec::new();
            for el in &hits.credential {
                for field in extract_field_names(&el.html().to_lowercase()) {
                    if !fields.contains(&field) {
                        fields.push(field);
                    }
                }
            }
            if fields.is_empty() {
                fields = vec!["email".to_string(), "password".to_string()];
            }
            components.push(AuthComponent::traditional(fields));
        }

        let providers: Vec<String> = OAUTH_PROVIDERS
            .iter()
            .filter(|p| hits.oauth.iter().any(|(_, brand)| brand == *p))
            .map(|p| p.to_string())
            .collect();
        if !providers.is_empty() {
            components.push(AuthComponent::oauth(providers));
        }

        debug!(count = components.len(), "scorer candidates");
        components
    }

    /// Container snippet for one detected component.
    pub fn snippet_for(&self, component: &AuthComponent) -> Option<String> {
        let container = match component.details() {
            ComponentDetails::Traditional { .. } => {
                let hits = self.hits();
                let anchor = hits
                    .credential
                    .first()
                    .or_else(|| hits.action.first())
                    .copied()?;
                closest_container(anchor, SINGLE_CONTAINER_MAX_TEXT)
            }
            ComponentDetails::Oauth { providers } => {
                let hits = self.hits();
                let named: Vec<ElementRef<'_>> = hits
                    .oauth
                    .iter()
                    .filter(|(_, brand)| providers.iter().any(|p| p == brand))
                    .map(|(el, _)| *el)
                    .collect();
                let buttons = if named.is_empty() {
                    hits.oauth.iter().map(|(el, _)| *el).collect()
                } else {
                    named
                };
                oauth_container(&buttons)
            }
            ComponentDetails::Passwordless { method } => {
                let anchor = self.passwordless_anchor(method)?;
                if anchor.value().name() == AUTH_WIDGET_TAG {
                    Some(anchor)
                } else {
                    closest_container(anchor, SINGLE_CONTAINER_MAX_TEXT)
                }
            }
        }?;
        Some(self.render(&container))
    }

    /// One snippet covering the whole auth widget.
    ///
    /// Credentials and provider buttons are first contained together. If
    /// their common ancestor is page-level or oversized, the two containers
    /// are resolved separately and concatenated.
    pub fn widget_snippet(&self) -> Option<String> {
        let hits = self.hits();
        let buttons: Vec<ElementRef<'_>> = hits.oauth.iter().map(|(el, _)| *el).collect();

        match (hits.credential.first().copied(), buttons.is_empty()) {
            (Some(credential), false) => {
                let mut all = vec![credential];
                all.extend(buttons.iter().copied());
                match common_container(&all, PAGE_CONTAINER_MAX_TEXT) {
                    Ok(lca) => Some(self.render(&lca)),
                    Err(reason) => {
                        debug!(%reason, "combined container rejected, resolving separately");
                        let form = closest_container(credential, SINGLE_CONTAINER_MAX_TEXT);
                        let providers = oauth_container(&buttons);
                        match (form, providers) {
                            (Some(a), Some(b)) if a.id() == b.id() => Some(self.render(&a)),
                            (Some(a), Some(b)) => Some(format!(
                                "{}\n{OAUTH_SECTION_LABEL}\n{}",
                                self.render(&a),
                                self.render(&b)
                            )),
                            (a, b) => a.or(b).map(|c| self.render(&c)),
                        }
                    }
                }
            }
            (Some(credential), true) => {
                closest_container(credential, SINGLE_CONTAINER_MAX_TEXT).map(|c| self.render(&c))
            }
            (None, false) => oauth_container(&buttons).map(|c| self.render(&c)),
            (None, true) => None,
        }
    }

    /// Method-named control, passkey or magic-link control, numeric code
    /// input, then the hosted widget element.
    fn passwordless_anchor(&self, method: &str) -> Option<ElementRef<'_>> {
        let method_words = method.replace(['-', '_'], " ").trim().to_lowercase();
        let controls = Selector::parse(CONTROL_SELECTOR).ok()?;

        for phrase in [method_words.as_str(), "passkey", "magic link"] {
            if phrase.is_empty() {
                continue;
            }
            let hit = self.document.select(&controls).find(|el| {
                is_interactive(el)
                    && (text_prefix(el).contains(phrase)
                        || el
                            .value()
                            .attr("value")
                            .map(|v| v.to_lowercase().contains(phrase))
                            .unwrap_or(false))
            });
            if hit.is_some() {
                return hit;
            }
        }

        [r#"input[inputmode="numeric"]"#, AUTH_WIDGET_TAG]
            .iter()
            .filter_map(|css| Selector::parse(css).ok())
            .find_map(|sel| self.document.select(&sel).next())
    }

    fn render(&self, element: &ElementRef<'_>) -> String {
        truncate_snippet(&sanitize_element(element), self.max_chars)
    }
}

/// LCA of several provider buttons, or the closest container of one.
fn oauth_container<'a>(buttons: &[ElementRef<'a>]) -> Option<ElementRef<'a>> {
    let first = *buttons.first()?;
    if buttons.len() > 1 {
        if let Ok(lca) = common_container(buttons, SINGLE_CONTAINER_MAX_TEXT) {
            return Some(lca);
        }
    }
    closest_container(first, SINGLE_CONTAINER_MAX_TEXT)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1_500;

    #[test]
    fn test_shared_panel_is_one_snippet() {
        let html = r#"<html><body><header>Shop</header>
            <div class="panel">
              <form action="/session"><input type="email" name="email"><input type="password" name="pw"></form>
              <div class="row"><button>Continue with Google</button><button>Continue with Apple</button></div>
            </div></body></html>"#;
        let widget = StaticAnalysis::parse(html, MAX).widget_snippet().unwrap();
        assert!(widget.starts_with(r#"<div class="panel">"#));
        assert!(widget.contains("Continue with Apple"));
        assert!(!widget.contains(OAUTH_SECTION_LABEL));
    }

    #[test]
    fn test_oversized_main_falls_back_to_concatenation() {
        let filler = "lorem ipsum ".repeat(1_500);
        let html = format!(
            r#"<html><body><main>
              <section class="login"><form action="/s"><input type="email"><input type="password"></form></section>
              <p>{filler}</p>
              <div class="social-login"><button>Continue with Google</button><button>Continue with Apple</button></div>
            </main></body></html>"#
        );
        let widget = StaticAnalysis::parse(&html, MAX).widget_snippet().unwrap();
        assert!(!widget.contains("<main"));
        assert!(!widget.contains("lorem"));

        let (form, providers) = widget.split_once(OAUTH_SECTION_LABEL).unwrap();
        assert!(form.trim().starts_with(r#"<form action="/s">"#));
        assert!(providers.trim().starts_with(r#"<div class="social-login">"#));
    }

    #[test]
    fn test_component_snippets() {
        let html = r#"<html><body>
            <div id="signin-box"><form><input type="password" name="p"></form></div>
            <nav><a href="/x">Sign in with GitHub</a></nav>
            <div class="otp"><label>Code</label><input inputmode="numeric" name="code"></div>
            </body></html>"#;
        let analysis = StaticAnalysis::parse(html, MAX);

        let traditional = analysis
            .snippet_for(&AuthComponent::traditional(vec![]))
            .unwrap();
        assert!(traditional.starts_with("<form>"));

        let oauth = analysis
            .snippet_for(&AuthComponent::oauth(vec!["github".into()]))
            .unwrap();
        assert!(oauth.starts_with("<nav>"));

        let otp = analysis
            .snippet_for(&AuthComponent::passwordless("otp"))
            .unwrap();
        assert!(otp.starts_with(r#"<div class="otp">"#));
    }

    #[test]
    fn test_widget_element_and_truncation() {
        let html = format!(
            r#"<body><{AUTH_WIDGET_TAG} flow-id="sign-in">{}</{AUTH_WIDGET_TAG}></body>"#,
            "x".repeat(100)
        );
        let snippet = StaticAnalysis::parse(&html, 40)
            .snippet_for(&AuthComponent::passwordless("passkey"))
            .unwrap();
        assert!(snippet.starts_with(&format!("<{AUTH_WIDGET_TAG}")));
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), 43);
    }

    #[test]
    fn test_scored_hits_become_components() {
        let html = r#"<html><body><div class="card">
            <form><input type="email" name="login"><input type="password" name="pw"><button>Sign in</button></form>
            <button>Continue with GitHub</button><button>Continue with Google</button>
            </div></body></html>"#;
        let components = StaticAnalysis::parse(html, MAX).components();
        assert_eq!(components.len(), 2);
        let fields = components[0].details().fields();
        assert_eq!(fields.len(), 2);
        assert!(fields.contains(&"email".to_string()));
        assert!(fields.contains(&"password".to_string()));
        assert_eq!(
            components[1].details().providers(),
            ["google".to_string(), "github".to_string()]
        );
    }

    #[test]
    fn test_no_hits() {
        let analysis = StaticAnalysis::parse("<html><body><p>Hello</p></body></html>", MAX);
        assert!(analysis.widget_snippet().is_none());
        assert!(analysis.components().is_empty());
        assert!(analysis
            .snippet_for(&AuthComponent::traditional(vec![]))
            .is_none());
        assert!(analysis
            .snippet_for(&AuthComponent::passwordless("passkey"))
            .is_none());
    }
}
