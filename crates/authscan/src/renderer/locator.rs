//! Location descriptions.
//!
//! A location description is free text, either from the inference service or
//! from a fixed fallback table. It is parsed into a [`Locator`] and evaluated
//! in the page by an injected script. Text matching is case-insensitive and
//! whitespace-collapsed; when several elements match, the deepest wins.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Parsed location description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Plain CSS selector.
    Css(String),
    /// Element whose visible text contains (or, when `exact`, equals) `text`.
    Text { text: String, exact: bool },
    /// CSS scope filtered by contained text.
    CssWithText { css: String, text: String },
    /// Element with an ARIA role (or its native equivalent) and accessible name.
    Role { role: String, name: String },
}

fn has_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(?s)(.*?):has-text\(\s*(?:"([^"]*)"|'([^']*)')\s*\)$"#)
            .expect("has-text regex is valid")
    })
}

fn role_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^role=([A-Za-z]+)(?:\[\s*name\s*=\s*(?:"([^"]*)"|'([^']*)')\s*(?:i\s*)?\])?$"#)
            .expect("role regex is valid")
    })
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([^"]{2,})"|“([^”]{2,})”|'([^']{2,})'"#).expect("quoted regex is valid")
    })
}

/// Characters that only appear in CSS, never in a prose description.
const CSS_MARKERS: &[char] = &['#', '.', '[', '>', ':', '*', '=', '~', '+'];

impl Locator {
    /// Parse a location description. Returns `None` for prose that names no
    /// element, which sends the candidate straight to its fallback chain.
    pub fn parse(description: &str) -> Option<Locator> {
        let desc = description.trim();
        if desc.is_empty() {
            return None;
        }

        if let Some(css) = desc.strip_prefix("css=") {
            let css = css.trim();
            return (!css.is_empty()).then(|| Locator::Css(css.to_string()));
        }

        if let Some(text) = desc.strip_prefix("text=") {
            let text = text.trim();
            return match unquote(text) {
                Some(inner) if !inner.trim().is_empty() => Some(Locator::Text {
                    text: inner.to_string(),
                    exact: true,
                }),
                Some(_) => None,
                None if text.is_empty() => None,
                None => Some(Locator::Text {
                    text: text.to_string(),
                    exact: false,
                }),
            };
        }

        if let Some(caps) = role_re().captures(desc) {
            let name = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return Some(Locator::Role {
                role: caps[1].to_ascii_lowercase(),
                name,
            });
        }

        if let Some(caps) = has_text_re().captures(desc) {
            let css = caps[1].trim();
            let text = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            return Some(Locator::CssWithText {
                css: if css.is_empty() { "*".to_string() } else { css.to_string() },
                text: text.to_string(),
            });
        }

        if looks_like_css(desc) {
            return Some(Locator::Css(desc.to_string()));
        }

        // Prose: the only usable part is a quoted phrase.
        quoted_re().captures(desc).and_then(|caps| {
            let phrase = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
            Some(Locator::Text {
                text: phrase.as_str().trim().to_string(),
                exact: false,
            })
        })
    }

    /// Build a locator for an interactive element containing `text`.
    pub fn control_with_text(text: impl Into<String>) -> Locator {
        Locator::CssWithText {
            css: CONTROL_SELECTOR.to_string(),
            text: text.into(),
        }
    }

    fn query(&self) -> Query<'_> {
        match self {
            Locator::Css(css) => Query {
                css: css.as_str().into(),
                text: None,
                exact: false,
            },
            Locator::Text { text, exact } => Query {
                css: "body *".into(),
                text: Some(text),
                exact: *exact,
            },
            Locator::CssWithText { css, text } => Query {
                css: css.as_str().into(),
                text: Some(text),
                exact: false,
            },
            Locator::Role { role, name } => Query {
                css: role_selector(role).into(),
                text: (!name.is_empty()).then_some(name.as_str()),
                exact: false,
            },
        }
    }

    /// Script evaluating this locator once in the page.
    ///
    /// It yields `{exists, visible, outerHTML}`; the caller polls it.
    pub fn resolve_script(&self) -> String {
        // Serializing a struct of strings cannot fail.
        let query = serde_json::to_string(&self.query()).unwrap_or_else(|_| "{}".to_string());
        RESOLVE_SCRIPT.replace("__QUERY__", &query)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(css) => write!(f, "css={css}"),
            Locator::Text { text, exact: true } => write!(f, "text=\"{text}\""),
            Locator::Text { text, exact: false } => write!(f, "text={text}"),
            Locator::CssWithText { css, text } => write!(f, "{css}:has-text(\"{text}\")"),
            Locator::Role { role, name } => write!(f, "role={role}[name=\"{name}\"]"),
        }
    }
}

/// Buttons and links, native or by role.
pub const CONTROL_SELECTOR: &str =
    r#"button, a, [role="button"], [role="link"], input[type="submit"], input[type="button"]"#;

#[derive(Serialize)]
struct Query<'a> {
    css: std::borrow::Cow<'a, str>,
    text: Option<&'a str>,
    exact: bool,
}

fn role_selector(role: &str) -> String {
    match role {
        "button" => r#"button, [role="button"], input[type="submit"], input[type="button"]"#.to_string(),
        "link" => r#"a[href], [role="link"]"#.to_string(),
        "textbox" => r#"input:not([type]), input[type="text"], input[type="email"], textarea, [role="textbox"]"#.to_string(),
        "form" => r#"form, [role="form"]"#.to_string(),
        other => format!(r#"[role="{other}"]"#),
    }
}

fn unquote(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return Some(&text[1..text.len() - 1]);
        }
    }
    None
}

fn looks_like_css(desc: &str) -> bool {
    let single_word = !desc.contains(char::is_whitespace);
    let marked = desc.contains(CSS_MARKERS);
    (marked || single_word) && scraper::Selector::parse(desc).is_ok()
}

const RESOLVE_SCRIPT: &str = r#"(() => {
  const q = __QUERY__;
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
  const isVisible = (el) => {
    if (!el.getClientRects().length) return false;
    const style = window.getComputedStyle(el);
    return style.visibility !== 'hidden' && style.display !== 'none' && style.opacity !== '0';
  };
  let found;
  try {
    found = Array.from(document.querySelectorAll(q.css));
  } catch (e) {
    return { exists: false, visible: false, outerHTML: null };
  }
  if (q.text !== null) {
    const want = norm(q.text);
    const texts = (el) => [el.innerText || el.textContent, el.getAttribute('aria-label'), el.getAttribute('value'), el.getAttribute('title')].map(norm);
    found = found.filter((el) => texts(el).some((t) => (q.exact ? t === want : t.includes(want))));
    found = found.filter((el) => !found.some((other) => other !== el && el.contains(other)));
  }
  if (!found.length) return { exists: false, visible: false, outerHTML: null };
  const el = found.find(isVisible) || found[0];
  return { exists: true, visible: isVisible(el), outerHTML: el.outerHTML };
})()"#;
