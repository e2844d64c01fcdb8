//! Snippet sanitizer.
//!
//! Strips nodes that carry no visual meaning from a markup fragment before
//! it is handed out as a snippet. Input is always re-parsed into its own
//! tree, so the live document and the caller's parsed DOM are never touched.

use regex::Regex;
use scraper::{ElementRef, Html, Node};
use std::sync::OnceLock;

/// Elements removed together with their whole subtree.
const STRIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "link", "meta", "template", "head",
];

/// Inline SVG larger than this (serialized) is treated as a decorative sprite.
pub const MAX_INLINE_SVG_CHARS: usize = 2_000;

/// Replacement for embedded base64 image payloads.
pub const IMAGE_DATA_PLACEHOLDER: &str = "data:image/x-placeholder,removed";

fn inline_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"data:image/[A-Za-z0-9.+\-]+;base64,[A-Za-z0-9+/=\s]*")
            .expect("inline image regex is valid")
    })
}

/// Sanitize a serialized fragment and return the cleaned markup.
pub fn sanitize_fragment(markup: &str) -> String {
    let mut fragment = Html::parse_fragment(markup);

    let doomed: Vec<_> = fragment
        .tree
        .root()
        .descendants()
        .filter(|node| match node.value() {
            Node::Comment(_) => true,
            Node::Element(el) => {
                let name = el.name();
                if STRIPPED_TAGS.contains(&name) {
                    return true;
                }
                name == "svg"
                    && ElementRef::wrap(*node)
                        .map(|svg| svg.html().chars().count() > MAX_INLINE_SVG_CHARS)
                        .unwrap_or(false)
            }
            _ => false,
        })
        .map(|node| node.id())
        .collect();

    for id in doomed {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            node.detach();
        }
    }

    let html = fragment.root_element().inner_html();
    strip_inline_images(html.trim())
}

/// Sanitize an element from an already-parsed document.
pub fn sanitize_element(element: &ElementRef<'_>) -> String {
    sanitize_fragment(&element.html())
}

fn strip_inline_images(markup: &str) -> String {
    inline_image_re()
        .replace_all(markup, IMAGE_DATA_PLACEHOLDER)
        .into_owned()
}

/// Truncate to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_snippet(snippet: &str, max_chars: usize) -> String {
    match snippet.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &snippet[..cut]),
        None => snippet.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_non_visual_nodes() {
        let input = r#"<form id="login"><!-- tracking --><script>alert(1)</script><style>.x{}</style><noscript>js off</noscript><input type="password" name="pw"><iframe src="x"></iframe><template><p>t</p></template></form>"#;
        let out = sanitize_fragment(input);
        assert!(out.contains(r#"type="password""#));
        assert!(out.contains(r#"name="pw""#));
        assert!(out.starts_with(r#"<form id="login">"#));
        for gone in ["<!--", "<script", "<style", "<noscript", "<iframe", "<template"] {
            assert!(!out.contains(gone), "{gone} survived: {out}");
        }
    }

    #[test]
    fn test_large_svg_removed_small_kept() {
        let path = "M0 0L1 1".repeat(400);
        let big = format!(r#"<button><svg><path d="{path}"></path></svg>Google</button>"#);
        let out = sanitize_fragment(&big);
        assert!(!out.contains("<svg"));
        assert!(out.contains("Google"));

        let small = r#"<button><svg width="16"><path d="M0 0"></path></svg>Apple</button>"#;
        assert!(sanitize_fragment(small).contains("<svg"));
    }

    #[test]
    fn test_svg_ceiling_counts_chars_not_bytes() {
        // Three-byte chars: over the ceiling in bytes, under it in chars.
        let label = "\u{2713}".repeat(600);
        let svg = format!(r#"<svg><title>{label}</title><title>{label}</title></svg>"#);
        assert!(svg.len() > MAX_INLINE_SVG_CHARS);
        assert!(svg.chars().count() < MAX_INLINE_SVG_CHARS);

        let out = sanitize_fragment(&format!("<button>{svg}Apple</button>"));
        assert!(out.contains("<svg"));
    }

    #[test]
    fn test_inline_image_data_replaced() {
        let input = r#"<img alt="logo" src="data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAAB">"#;
        let out = sanitize_fragment(input);
        assert!(!out.contains("iVBORw0KGgo"));
        assert!(out.contains(IMAGE_DATA_PLACEHOLDER));
        assert!(out.contains(r#"alt="logo""#));
    }

    #[test]
    fn test_idempotent() {
        let input = r#"<div class="auth"><!-- c --><script>x()</script><a href="/login">Log in</a><img src="data:image/gif;base64,R0lGOD"></div>"#;
        let once = sanitize_fragment(input);
        assert_eq!(sanitize_fragment(&once), once);
    }

    #[test]
    fn test_sanitize_element_leaves_source_untouched() {
        let doc = Html::parse_document(
            "<html><body><form><script>s()</script><input name=email></form></body></html>",
        );
        let sel = scraper::Selector::parse("form").unwrap();
        let form = doc.select(&sel).next().unwrap();
        let out = sanitize_element(&form);
        assert!(!out.contains("script"));
        assert!(form.html().contains("<script>"));
    }

    #[test]
    fn test_truncate_snippet() {
        assert_eq!(truncate_snippet("abcdef", 10), "abcdef");
        assert_eq!(truncate_snippet("abcdef", 3), "abc...");
        assert_eq!(truncate_snippet("ééééé", 2), "éé...");
    }
}
