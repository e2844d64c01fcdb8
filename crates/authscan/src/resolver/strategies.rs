//! Fallback strategy tables.
//!
//! Each component type has an ordered list of location descriptions tried
//! when the primary description is missing or fails. The tables use the same
//! grammar as inference output and are parsed with [`Locator::parse`].

use crate::renderer::Locator;
use crate::types::{AuthComponent, ComponentDetails, AUTH_WIDGET_TAG};

/// Traditional login: password form, sign-in controls, login hrefs.
pub const TRADITIONAL_CHAIN: &[&str] = &[
    r#"css=form:has(input[type="password"])"#,
    r#"role=button[name="Sign in"]"#,
    r#"role=link[name="Sign in"]"#,
    r#"role=button[name="Log in"]"#,
    r#"role=link[name="Log in"]"#,
    r#"css=a[href*="login" i], a[href*="signin" i], a[href*="sign-in" i], a[href*="log-in" i]"#,
];

/// Phrasings tried for every provider. `{Provider}` is the capitalized name,
/// `{provider}` the identifier.
pub const PROVIDER_VARIANTS: &[&str] = &[
    "{Provider}",
    "Sign in with {Provider}",
    "Continue with {Provider}",
    "Log in with {Provider}",
    r#"css=[data-provider*="{provider}" i], [data-provider-id*="{provider}" i], [data-testid*="{provider}" i]"#,
];

/// Control wording tried after the method-named control.
pub const PASSWORDLESS_PHRASES: &[&str] = &["passkey", "magic link"];

/// One-time code entry field.
pub const NUMERIC_INPUT: &str = r#"css=input[inputmode="numeric"]"#;

/// A named attempt in a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub label: String,
    pub locator: Locator,
}

impl Strategy {
    fn parse(label: impl Into<String>, description: &str) -> Option<Strategy> {
        Locator::parse(description).map(|locator| Strategy {
            label: label.into(),
            locator,
        })
    }
}

/// Ordered fallback attempts for a component.
///
/// OAuth chains are run under the provider-sweep budget; the others only
/// under the per-attempt and batch budgets.
pub fn fallback_chain(component: &AuthComponent) -> Vec<Strategy> {
    match component.details() {
        ComponentDetails::Traditional { .. } => TRADITIONAL_CHAIN
            .iter()
            .filter_map(|desc| Strategy::parse("traditional", desc))
            .collect(),
        ComponentDetails::Oauth { providers } => providers
            .iter()
            .flat_map(|provider| provider_strategies(provider))
            .collect(),
        ComponentDetails::Passwordless { method } => passwordless_strategies(method),
    }
}

/// Every phrasing variant for one provider.
pub fn provider_strategies(provider: &str) -> Vec<Strategy> {
    let id = provider.trim().to_lowercase();
    if id.is_empty() {
        return Vec::new();
    }
    let display = capitalize(&id);

    PROVIDER_VARIANTS
        .iter()
        .filter_map(|variant| {
            let filled = variant
                .replace("{Provider}", &display)
                .replace("{provider}", &id);
            if filled.starts_with("css=") {
                Strategy::parse(format!("oauth:{id}"), &filled)
            } else {
                Some(Strategy {
                    label: format!("oauth:{id}"),
                    locator: Locator::control_with_text(filled),
                })
            }
        })
        .collect()
}

fn passwordless_strategies(method: &str) -> Vec<Strategy> {
    let words = method.replace(['-', '_'], " ");
    let label = format!("passwordless:{method}");

    let mut locators: Vec<Locator> = std::iter::once(words.trim())
        .chain(PASSWORDLESS_PHRASES.iter().copied())
        .filter(|phrase| !phrase.is_empty())
        .map(Locator::control_with_text)
        .collect();
    locators.extend(Locator::parse(NUMERIC_INPUT));
    locators.push(Locator::Css(AUTH_WIDGET_TAG.to_string()));

    let mut chain: Vec<Strategy> = Vec::with_capacity(locators.len());
    for locator in locators {
        if !chain.iter().any(|s| s.locator == locator) {
            chain.push(Strategy {
                label: label.clone(),
                locator,
            });
        }
    }
    chain
}

fn capitalize(id: &str) -> String {
    match id {
        "github" => "GitHub".to_string(),
        "gitlab" => "GitLab".to_string(),
        "linkedin" => "LinkedIn".to_string(),
        "sso" => "SSO".to_string(),
        _ => {
            let mut chars = id.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_parse() {
        for desc in TRADITIONAL_CHAIN.iter().chain([&NUMERIC_INPUT]) {
            assert!(Locator::parse(desc).is_some(), "unparseable {desc}");
        }
    }

    #[test]
    fn test_traditional_chain_order() {
        let chain = fallback_chain(&AuthComponent::traditional(vec![]));
        assert_eq!(chain.len(), TRADITIONAL_CHAIN.len());
        assert!(matches!(&chain[0].locator, Locator::Css(css) if css.contains("password")));
        assert!(matches!(&chain.last().unwrap().locator, Locator::Css(css) if css.contains("href")));
    }

    #[test]
    fn test_provider_variants() {
        let chain = fallback_chain(&AuthComponent::oauth(vec!["github".into(), "apple".into()]));
        assert_eq!(chain.len(), 2 * PROVIDER_VARIANTS.len());
        assert_eq!(chain[0].locator, Locator::control_with_text("GitHub"));
        assert_eq!(
            chain[2].locator,
            Locator::control_with_text("Continue with GitHub")
        );
        assert!(
            matches!(&chain[4].locator, Locator::Css(css) if css.contains(r#"[data-provider*="github" i]"#))
        );
        assert_eq!(chain[5].label, "oauth:apple");
    }

    #[test]
    fn test_passwordless_chain() {
        let chain = fallback_chain(&AuthComponent::passwordless("magic-link"));
        assert_eq!(chain[0].locator, Locator::control_with_text("magic link"));
        assert_eq!(
            chain.last().unwrap().locator,
            Locator::Css(AUTH_WIDGET_TAG.to_string())
        );
        assert!(chain
            .iter()
            .any(|s| s.locator == Locator::Css(r#"input[inputmode="numeric"]"#.into())));
        assert_eq!(
            chain
                .iter()
                .filter(|s| s.locator == Locator::control_with_text("magic link"))
                .count(),
            1
        );

        let passkey = fallback_chain(&AuthComponent::passwordless("passkey"));
        assert_eq!(passkey.len(), 4);
    }
}
