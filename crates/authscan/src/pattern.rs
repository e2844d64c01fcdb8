//! Pattern-matching detector.
//!
//! The dependency-free fallback: scans raw markup text with fixed patterns
//! and needs neither a live page nor the inference service. Recall is
//! deliberately broad; false positives surface later as snippets that fail
//! to resolve.
//!
//! Yields at most one component per type, in the order traditional, OAuth,
//! passwordless.

use crate::types::{AuthComponent, OAUTH_PROVIDERS};
use regex::Regex;
use std::sync::OnceLock;

/// How far into a form the password input may appear.
const FORM_SCAN_CHARS: usize = 2_000;

/// Maximum gap between a provider name and an action verb.
const PROVIDER_VERB_WINDOW: usize = 60;

/// Passwordless methods in priority order, each with its trigger pattern.
const PASSWORDLESS_METHODS: &[(&str, &str)] = &[
    ("passkey", r"\bpass[\s-]?keys?\b|\bwebauthn\b"),
    ("magic-link", r"\bmagic[\s_-]?link"),
    ("otp", r"\botp\b|\bone[\s-]time\b"),
];

fn password_input_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<input\b[^>]*\btype\s*=\s*["']?password"#).expect("password regex is valid")
    })
}

fn sign_in_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:sign|log)[\s_-]?in\b").expect("sign-in regex is valid"))
}

fn verb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:sign[\s_-]?(?:in|up|on)|log[\s_-]?(?:in|on)|continue)\b")
            .expect("verb regex is valid")
    })
}

fn provider_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = OAUTH_PROVIDERS.join("|");
        Regex::new(&format!(r"\b(?:{alternation})\b")).expect("provider regex is valid")
    })
}

fn input_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<input\b[^>]*>").expect("input regex is valid"))
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\b(type|name|id|autocomplete)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
            .expect("attribute regex is valid")
    })
}

fn passwordless_res() -> &'static [(&'static str, Regex)] {
    static RES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    RES.get_or_init(|| {
        PASSWORDLESS_METHODS
            .iter()
            .map(|(method, pattern)| {
                (
                    *method,
                    Regex::new(pattern).expect("passwordless regex is valid"),
                )
            })
            .collect()
    })
}

/// Run every pattern check against the markup.
pub fn detect_patterns(markup: &str) -> Vec<AuthComponent> {
    let lower = markup.to_lowercase();

    [
        detect_traditional(&lower),
        detect_oauth(&lower),
        detect_passwordless(&lower),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn detect_traditional(lower: &str) -> Option<AuthComponent> {
    if !(has_form_password(lower) || sign_in_re().is_match(lower)) {
        return None;
    }
    let mut fields = extract_field_names(lower);
    if fields.is_empty() {
        fields = vec!["email".to_string(), "password".to_string()];
    }
    Some(AuthComponent::traditional(fields))
}

/// A password input within the first [`FORM_SCAN_CHARS`] of some form.
pub fn has_form_password(lower: &str) -> bool {
    lower.match_indices("<form").any(|(start, _)| {
        let rest = &lower[start..];
        let window_end = rest
            .char_indices()
            .nth(FORM_SCAN_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];
        let window = match window.find("</form") {
            Some(close) => &window[..close],
            None => window,
        };
        password_input_re().is_match(window)
    })
}

fn detect_oauth(lower: &str) -> Option<AuthComponent> {
    let verbs: Vec<(usize, usize)> = verb_re()
        .find_iter(lower)
        .map(|m| (m.start(), m.end()))
        .collect();
    if verbs.is_empty() {
        return None;
    }

    let mut matched: Vec<&str> = Vec::new();
    for m in provider_re().find_iter(lower) {
        let near_verb = verbs.iter().any(|&(vs, ve)| {
            let gap = if ve <= m.start() {
                m.start() - ve
            } else if m.end() <= vs {
                vs - m.end()
            } else {
                0
            };
            gap <= PROVIDER_VERB_WINDOW
        });
        if near_verb && !matched.contains(&m.as_str()) {
            matched.push(m.as_str());
        }
    }

    if matched.is_empty() {
        return None;
    }

    let providers = OAUTH_PROVIDERS
        .iter()
        .filter(|p| matched.contains(*p))
        .map(|p| p.to_string())
        .collect();
    Some(AuthComponent::oauth(providers))
}

fn detect_passwordless(lower: &str) -> Option<AuthComponent> {
    passwordless_res()
        .iter()
        .find(|(_, re)| re.is_match(lower))
        .map(|(method, _)| AuthComponent::passwordless(*method))
}

/// Semantic field names from the inputs in the markup, in document order.
pub fn extract_field_names(lower: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();

    for tag in input_tag_re().find_iter(lower) {
        let mut input_type = "text".to_string();
        let mut naming = String::new();
        for caps in attr_re().captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if &caps[1] == "type" {
                input_type = value.to_string();
            } else {
                naming.push(' ');
                naming.push_str(value);
            }
        }

        let field = match input_type.as_str() {
            "hidden" | "submit" | "button" | "checkbox" | "radio" | "image" | "search" => None,
            "password" => Some("password"),
            "email" => Some("email"),
            "tel" => Some("phone"),
            _ if naming.contains("email") => Some("email"),
            _ if naming.contains("user") || naming.contains("login") => Some("username"),
            _ if naming.contains("phone") => Some("phone"),
            _ => None,
        };

        if let Some(field) = field {
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComponentDetails, ComponentType};

    fn kinds(components: &[AuthComponent]) -> Vec<ComponentType> {
        components.iter().map(|c| c.kind()).collect()
    }

    #[test]
    fn test_form_with_password_is_traditional() {
        let found = detect_patterns(r#"<form><input type="password"><input type="email"></form>"#);
        assert_eq!(kinds(&found), vec![ComponentType::Traditional]);
        let fields = found[0].details().fields();
        assert!(fields.contains(&"password".to_string()));
        assert!(fields.contains(&"email".to_string()));
    }

    #[test]
    fn test_password_beyond_window_needs_keyword() {
        let padding = "x".repeat(FORM_SCAN_CHARS + 10);
        let html = format!(r#"<form><p>{padding}</p><input type="password"></form>"#);
        assert!(!has_form_password(&html));
        assert!(detect_patterns(&html).is_empty());
    }

    #[test]
    fn test_password_after_form_close_not_counted() {
        assert!(!has_form_password(
            r#"<form action="/s"></form><input type="password">"#
        ));
    }

    #[test]
    fn test_keyword_only_uses_default_fields() {
        let found = detect_patterns(r#"<a href="/account">Sign In</a>"#);
        assert_eq!(
            found[0].details(),
            &ComponentDetails::Traditional {
                fields: vec!["email".into(), "password".into()]
            }
        );
    }

    #[test]
    fn test_providers_merged_in_table_order() {
        let html = r#"<button>Continue with Apple</button><button>Continue with Google</button><button>Sign in with email</button>"#;
        let found = detect_patterns(html);
        assert_eq!(
            kinds(&found),
            vec![ComponentType::Traditional, ComponentType::Oauth]
        );
        assert_eq!(
            found[1].details().providers(),
            ["google".to_string(), "apple".to_string()]
        );
    }

    #[test]
    fn test_provider_without_verb_ignored() {
        let html = r#"<footer>Follow us on <a href="https://twitter.com/x">Twitter</a> and GitHub</footer>"#;
        assert!(detect_patterns(html).is_empty());
    }

    #[test]
    fn test_provider_verb_either_order() {
        let found = detect_patterns("<a>GitHub login</a>");
        let oauth = found.iter().find(|c| c.kind() == ComponentType::Oauth).unwrap();
        assert_eq!(oauth.details().providers(), ["github".to_string()]);
    }

    #[test]
    fn test_logo_is_not_a_verb() {
        let html = r#"<img class="google-logo" src="g.png">"#;
        assert!(detect_patterns(html).is_empty());
    }

    #[test]
    fn test_passwordless_priority() {
        let found = detect_patterns("<p>Get a one-time code or a magic link, or use a passkey</p>");
        let pl = found
            .iter()
            .find(|c| c.kind() == ComponentType::Passwordless)
            .unwrap();
        assert_eq!(
            pl.details(),
            &ComponentDetails::Passwordless {
                method: "passkey".into()
            }
        );

        let found = detect_patterns("<p>We will email you an OTP</p>");
        assert_eq!(
            found[0].details(),
            &ComponentDetails::Passwordless {
                method: "otp".into()
            }
        );
    }

    #[test]
    fn test_nothing_auth_related() {
        assert!(detect_patterns("<html><body><h1>Shop</h1><p>Great deals</p></body></html>").is_empty());
    }

    #[test]
    fn test_field_names() {
        let lower = r#"<input type="hidden" name="csrf"><input name="user_login"><input type=tel><input type="text" id="email-address"><input type="password">"#;
        assert_eq!(
            extract_field_names(lower),
            vec!["username", "phone", "email", "password"]
        );
    }
}
