//! Element scorer for the heuristic (static DOM) detection path.
//!
//! Each element is scored from its own attributes and a bounded prefix of its
//! text. Scores are additive and only meaningful relative to each other and to
//! [`MIN_ACCEPT_SCORE`].
//!
//! All entry points are synchronous because `scraper` types are `!Send`.

use crate::types::OAUTH_PROVIDERS;
use scraper::{ElementRef, Html};

/// Attributes inspected for keyword matches.
const SCORED_ATTRIBUTES: &[&str] = &[
    "type",
    "name",
    "id",
    "class",
    "placeholder",
    "aria-label",
    "data-testid",
    "autocomplete",
];

/// Words that signal an authentication action when they start a word.
const ACTION_VERBS: &[&str] = &[
    "sign", "login", "log in", "log-in", "logon", "log on", "continue", "auth", "connect",
    "account", "identity",
];

const LOGIN_WORDS: &[&str] = &["login", "log-in", "log_in", "signin", "sign-in", "sign_in"];
const LOGIN_PHRASES: &[&str] = &["sign in", "log in", "login", "signin", "sign-in", "log-in"];

/// Subtrees never scored.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "head", "svg"];

/// Minimum score for an element to count as a hit.
pub const MIN_ACCEPT_SCORE: u32 = 10;

/// Only this much of an element's text takes part in scoring.
const TEXT_PREFIX_CHARS: usize = 200;

/// Short-text limit for generic call-to-action elements.
const ACTION_TEXT_MAX: usize = 30;

/// Provisional category of a scored element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Password, email or username input.
    Credential,
    /// Button or link naming an identity provider.
    OAuth,
    /// Interactive element with sign-in wording but no input signal.
    Action,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementScore {
    pub score: u32,
    pub kind: ElementKind,
    /// Provider name for OAuth hits.
    pub brand: Option<&'static str>,
}

impl ElementScore {
    const NONE: ElementScore = ElementScore {
        score: 0,
        kind: ElementKind::Unknown,
        brand: None,
    };

    pub fn is_accepted(&self) -> bool {
        self.score >= MIN_ACCEPT_SCORE
    }
}

/// An element paired with its score for one ranking pass.
#[derive(Debug, Clone, Copy)]
pub struct ScoredElement<'a> {
    pub element: ElementRef<'a>,
    pub score: ElementScore,
}

/// Score a single element.
pub fn score_element(element: &ElementRef<'_>) -> ElementScore {
    let el = element.value();
    let tag = el.name();
    let input_type = el.attr("type").map(|t| t.to_ascii_lowercase());
    let interactive = is_interactive(element);

    let attrs = attribute_haystack(element);
    let text = text_prefix(element);
    let combined = format!("{attrs} {text}");

    // Providers short-circuit everything else.
    if interactive {
        if let Some(brand) = OAUTH_PROVIDERS
            .iter()
            .copied()
            .find(|p| contains_word(&combined, p))
        {
            let with_verb = ACTION_VERBS.iter().any(|v| starts_word(&combined, v));
            return ElementScore {
                score: if with_verb { 16 } else { 6 },
                kind: ElementKind::OAuth,
                brand: Some(brand),
            };
        }
    }

    let mut credential = 0u32;
    let mut login = 0u32;

    if tag == "input" && input_type.as_deref() == Some("password") {
        credential += 30;
    } else if ["password", "passwd", "pwd"].iter().any(|k| attrs.contains(k)) {
        credential += 10;
    }

    if tag == "input" && input_type.as_deref() == Some("email") {
        credential += 20;
    } else if el
        .attr("autocomplete")
        .map(|a| {
            let a = a.to_ascii_lowercase();
            a.contains("username") || a.contains("email")
        })
        .unwrap_or(false)
    {
        credential += 15;
    } else if ["email", "username", "user-name", "userid", "login-id"]
        .iter()
        .any(|k| attrs.contains(k))
    {
        credential += 5;
    }

    if LOGIN_WORDS.iter().any(|w| attrs.contains(w)) {
        login += 3;
    }
    if interactive && LOGIN_PHRASES.iter().any(|p| text.contains(p)) {
        login += 12;
    }

    if credential > 0 {
        return ElementScore {
            score: credential + login,
            kind: ElementKind::Credential,
            brand: None,
        };
    }
    if login > 0 && interactive {
        return ElementScore {
            score: login,
            kind: ElementKind::Action,
            brand: None,
        };
    }
    if interactive
        && text.chars().count() < ACTION_TEXT_MAX
        && ACTION_VERBS.iter().any(|v| starts_word(&text, v))
    {
        return ElementScore {
            score: 2,
            kind: ElementKind::Action,
            brand: None,
        };
    }
    if login > 0 {
        return ElementScore {
            score: login,
            kind: ElementKind::Unknown,
            brand: None,
        };
    }

    ElementScore::NONE
}

/// Score every element of a document, highest first.
///
/// Elements with a zero score are dropped. Ties keep document order.
pub fn rank_elements(document: &Html) -> Vec<ScoredElement<'_>> {
    let mut scored: Vec<ScoredElement<'_>> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| !in_skipped_subtree(el))
        .filter_map(|element| {
            let score = score_element(&element);
            (score.score > 0).then_some(ScoredElement { element, score })
        })
        .collect();

    scored.sort_by(|a, b| b.score.score.cmp(&a.score.score));
    scored
}

/// Buttons, links, submit inputs and anything with `role="button"`.
pub fn is_interactive(element: &ElementRef<'_>) -> bool {
    let el = element.value();
    match el.name() {
        "button" | "a" => true,
        "input" => matches!(
            el.attr("type").map(|t| t.to_ascii_lowercase()).as_deref(),
            Some("submit") | Some("button") | Some("image")
        ),
        _ => el
            .attr("role")
            .map(|r| r.eq_ignore_ascii_case("button") || r.eq_ignore_ascii_case("link"))
            .unwrap_or(false),
    }
}

fn in_skipped_subtree(element: &ElementRef<'_>) -> bool {
    SKIPPED_TAGS.contains(&element.value().name())
        || element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| SKIPPED_TAGS.contains(&a.value().name()))
}

fn attribute_haystack(element: &ElementRef<'_>) -> String {
    let el = element.value();
    SCORED_ATTRIBUTES
        .iter()
        .filter_map(|name| el.attr(name))
        .chain(el.attr("value").filter(|_| el.name() == "input"))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lower-cased, whitespace-collapsed text, cut at [`TEXT_PREFIX_CHARS`].
pub(crate) fn text_prefix(element: &ElementRef<'_>) -> String {
    let mut out = String::new();
    for chunk in element.text() {
        for word in chunk.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&word.to_lowercase());
            if out.len() >= TEXT_PREFIX_CHARS {
                return out;
            }
        }
    }
    out
}

/// `needle` occurs with non-alphanumeric characters (or the ends) on both sides.
pub(crate) fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(i, m)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + m.len()..].chars().next();
        !before.map(char::is_alphanumeric).unwrap_or(false)
            && !after.map(char::is_alphanumeric).unwrap_or(false)
    })
}

/// `needle` occurs at the start of a word.
pub(crate) fn starts_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(i, _)| {
        !haystack[..i]
            .chars()
            .next_back()
            .map(char::is_alphanumeric)
            .unwrap_or(false)
    })
}
