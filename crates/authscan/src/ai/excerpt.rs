//! Evidence excerpt builder.
//!
//! Runs a fixed, ordered battery of extractors over the raw markup and keeps
//! only the fragments likely to contain auth UI, so the prompt stays small.

use crate::config::ExcerptConfig;
use crate::sanitize::truncate_snippet;
use crate::types::AUTH_WIDGET_TAG;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Upper bound for any single extracted fragment.
const FRAGMENT_MAX_CHARS: usize = 3_000;

/// Context captured on either side of a matched button or link.
const CONTEXT_CHARS: usize = 400;

/// Chars kept after an auth-named `<div>` opening tag.
const CONTAINER_CHARS: usize = 2_000;

struct Extractors {
    forms: Regex,
    auth_forms: Regex,
    nav: Regex,
    header: Regex,
    controls: Regex,
    containers: Regex,
    widget: Regex,
    password_input: Regex,
    sign_in_phrase: Regex,
    control_keyword: Regex,
    body: Regex,
}

fn extractors() -> &'static Extractors {
    static EXTRACTORS: OnceLock<Extractors> = OnceLock::new();
    EXTRACTORS.get_or_init(|| {
        let re = |pattern: &str| Regex::new(pattern).expect("excerpt regex is valid");
        let providers = crate::types::OAUTH_PROVIDERS.join("|");
        Extractors {
            forms: re(r"(?is)<form\b[^>]*>.*?</form>"),
            auth_forms: re(
                r"(?is)<form\b[^>]*(?:login|log-in|signin|sign-in|auth|session|account)[^>]*>.*?</form>",
            ),
            nav: re(r"(?is)<nav\b[^>]*>.*?</nav>"),
            header: re(r"(?is)<header\b[^>]*>.*?</header>"),
            controls: re(r"(?is)<button\b[^>]*>.*?</button>|<a\b[^>]*>.*?</a>"),
            containers: re(
                r#"(?is)<div\b[^>]*\b(?:class|id)\s*=\s*["'][^"']*(?:auth|login|signin|sign-in|oauth|social|sso)[^"']*["'][^>]*>"#,
            ),
            widget: re(&format!(
                r"(?is)<{tag}\b[^>]*>(?:.*?</{tag}>)?",
                tag = AUTH_WIDGET_TAG
            )),
            password_input: re(r#"(?is)<input\b[^>]*\btype\s*=\s*["']?password"#),
            sign_in_phrase: re(r"(?i)\b(?:sign|log)[\s_-]?(?:in|up|on)\b|\bregister\b"),
            control_keyword: re(&format!(
                r"(?i)\b(?:sign[\s_-]?(?:in|up|on)|log[\s_-]?(?:in|on)|continue with|passkey|magic[\s_-]?link|{providers})\b"
            )),
            body: re(r"(?is)<body\b[^>]*>(.*)</body>"),
        }
    })
}

/// Build the bounded evidence excerpt for a document.
///
/// Falls back to the raw body when the extractors find less than
/// `min_chars`, so the prompt never goes out empty.
pub fn build_excerpt(markup: &str, config: &ExcerptConfig) -> String {
    let ex = extractors();
    let mut fragments: Vec<String> = Vec::new();

    // 1. Forms holding a password input.
    fragments.extend(
        ex.forms
            .find_iter(markup)
            .map(|m| m.as_str())
            .filter(|f| ex.password_input.is_match(f))
            .map(cap_fragment),
    );

    // 2. Forms whose attributes name auth keywords.
    fragments.extend(ex.auth_forms.find_iter(markup).map(|m| cap_fragment(m.as_str())));

    // 3. Navigation and header regions with sign-in language.
    for region in ex.nav.find_iter(markup).chain(ex.header.find_iter(markup)) {
        let region = region.as_str();
        let has_control = ex
            .controls
            .find_iter(region)
            .any(|c| ex.control_keyword.is_match(c.as_str()));
        if has_control || ex.sign_in_phrase.is_match(&visible_text(region)) {
            fragments.push(cap_fragment(region));
        }
    }

    // 4 + 5. Buttons and links with action or provider wording, standalone
    // and with surrounding structure.
    let controls: Vec<_> = ex
        .controls
        .find_iter(markup)
        .filter(|m| ex.control_keyword.is_match(m.as_str()))
        .collect();
    fragments.extend(controls.iter().map(|m| cap_fragment(m.as_str())));
    fragments.extend(
        controls
            .iter()
            .map(|m| cap_fragment(with_context(markup, m.start(), m.end()))),
    );

    // 6. Containers named after auth concepts.
    fragments.extend(
        ex.containers
            .find_iter(markup)
            .map(|m| slice_chars(&markup[m.start()..], CONTAINER_CHARS).to_string()),
    );

    // 7. Hosted auth widget element.
    fragments.extend(ex.widget.find_iter(markup).map(|m| cap_fragment(m.as_str())));

    let mut seen = HashSet::new();
    let joined = fragments
        .into_iter()
        .filter(|f| seen.insert(f.clone()))
        .collect::<Vec<_>>()
        .join("\n");

    let excerpt = slice_chars(&joined, config.max_chars).to_string();
    if excerpt.trim().chars().count() >= config.min_chars {
        return excerpt;
    }

    let body = ex
        .body
        .captures(markup)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(markup);
    slice_chars(body, config.max_chars).to_string()
}

fn cap_fragment(fragment: &str) -> String {
    truncate_snippet(fragment, FRAGMENT_MAX_CHARS)
}

/// Widen a match to the nearest tag boundaries within [`CONTEXT_CHARS`].
fn with_context(markup: &str, start: usize, end: usize) -> &str {
    let lo = floor_boundary(markup, start.saturating_sub(CONTEXT_CHARS));
    let lo = markup[lo..start].find('<').map(|i| lo + i).unwrap_or(start);

    let hi = ceil_boundary(markup, (end + CONTEXT_CHARS).min(markup.len()));
    let hi = markup[end..hi].rfind('>').map(|i| end + i + 1).unwrap_or(end);

    &markup[lo..hi]
}

/// First `max` characters of `s`.
fn slice_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Markup with tags removed, for phrase checks.
fn visible_text(markup: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex is valid"))
        .replace_all(markup, " ")
        .into_owned()
}
