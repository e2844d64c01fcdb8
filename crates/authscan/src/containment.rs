//! Containment resolver: find the container that bounds an auth widget.
//!
//! Two modes. [`closest_container`] ascends from one element to the nearest
//! form, auth-named block or landmark. [`common_container`] computes the
//! lowest common ancestor of several hits, for layouts where credential
//! inputs and provider buttons are siblings under one panel.

use scraper::ElementRef;

/// Text ceiling for a container around a single element.
pub const SINGLE_CONTAINER_MAX_TEXT: usize = 10_000;

/// Text ceiling for a container spanning several categories.
pub const PAGE_CONTAINER_MAX_TEXT: usize = 15_000;

/// Blind ascent used when no form, keyword or landmark ancestor exists.
const FALLBACK_ASCENT: usize = 3;

/// class/id fragments that mark an auth container.
const CONTAINER_KEYWORDS: &[&str] = &[
    "login", "log-in", "signin", "sign-in", "auth", "form", "account", "sso", "oauth", "social",
];

const LANDMARK_TAGS: &[&str] = &["section", "main", "dialog"];
const LANDMARK_ROLES: &[&str] = &["dialog", "main", "form"];

/// Containers too broad to be useful as a snippet.
const TOP_LEVEL_TAGS: &[&str] = &["html", "body", "main"];

/// Why a common container was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainmentFailure {
    NoHits,
    /// The LCA is the document root or a page-level landmark.
    TopLevel(String),
    Oversized { chars: usize, limit: usize },
}

impl std::fmt::Display for ContainmentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainmentFailure::NoHits => write!(f, "no elements to contain"),
            ContainmentFailure::TopLevel(tag) => write!(f, "common ancestor is <{tag}>"),
            ContainmentFailure::Oversized { chars, limit } => {
                write!(f, "container text {chars} exceeds {limit}")
            }
        }
    }
}

/// Nearest plausible container for a single element, or `None` if the only
/// candidate has more than `max_text` characters of text.
pub fn closest_container<'a>(element: ElementRef<'a>, max_text: usize) -> Option<ElementRef<'a>> {
    let container = self_and_ancestors(element)
        .find(|el| el.value().name() == "form")
        .or_else(|| {
            ancestors(element).find(|el| is_keyword_container(el) || is_landmark(el))
        })
        .or_else(|| blind_ascent(element))?;

    let chars = text_length(&container);
    if chars > max_text {
        tracing::debug!(
            tag = container.value().name(),
            chars,
            max_text,
            "container rejected as oversized"
        );
        return None;
    }
    Some(container)
}

/// Lowest common ancestor of all `hits`.
///
/// A single hit is its own LCA. Returns `None` for an empty slice.
pub fn lowest_common_ancestor<'a>(hits: &[ElementRef<'a>]) -> Option<ElementRef<'a>> {
    let chains: Vec<Vec<ElementRef<'a>>> = hits.iter().map(|hit| root_chain(*hit)).collect();
    let first = chains.first()?;

    let depth = first
        .iter()
        .enumerate()
        .take_while(|(i, node)| {
            chains[1..]
                .iter()
                .all(|chain| chain.get(*i).map(|n| n.id() == node.id()).unwrap_or(false))
        })
        .count();

    depth.checked_sub(1).map(|i| first[i])
}

/// LCA of `hits`, rejected if it is a page-level element or too large.
pub fn common_container<'a>(
    hits: &[ElementRef<'a>],
    max_text: usize,
) -> Result<ElementRef<'a>, ContainmentFailure> {
    let lca = lowest_common_ancestor(hits).ok_or(ContainmentFailure::NoHits)?;

    let tag = lca.value().name();
    if TOP_LEVEL_TAGS.contains(&tag) {
        return Err(ContainmentFailure::TopLevel(tag.to_string()));
    }

    let chars = text_length(&lca);
    if chars > max_text {
        return Err(ContainmentFailure::Oversized {
            chars,
            limit: max_text,
        });
    }
    Ok(lca)
}

/// Rendered-text approximation: trimmed text nodes outside script/style.
pub fn text_length(element: &ElementRef<'_>) -> usize {
    element
        .descendants()
        .filter(|node| node.value().is_text())
        .filter(|node| {
            !node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .map(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
                    .unwrap_or(false)
            })
        })
        .filter_map(|node| node.value().as_text().map(|t| t.trim().chars().count()))
        .sum()
}

fn self_and_ancestors<'a>(element: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    std::iter::once(element).chain(ancestors(element))
}

fn ancestors<'a>(element: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element.ancestors().filter_map(ElementRef::wrap)
}

/// Ancestors ordered root first, ending with `element` itself.
fn root_chain(element: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut chain: Vec<_> = ancestors(element).collect();
    chain.reverse();
    chain.push(element);
    chain
}

fn blind_ascent(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    ancestors(element)
        .take_while(|el| !matches!(el.value().name(), "body" | "html"))
        .take(FALLBACK_ASCENT)
        .last()
}

fn is_keyword_container(element: &ElementRef<'_>) -> bool {
    let el = element.value();
    let names = format!(
        "{} {}",
        el.attr("class").unwrap_or_default(),
        el.attr("id").unwrap_or_default()
    )
    .to_lowercase();
    CONTAINER_KEYWORDS.iter().any(|k| names.contains(k))
}

fn is_landmark(element: &ElementRef<'_>) -> bool {
    let el = element.value();
    LANDMARK_TAGS.contains(&el.name())
        || el
            .attr("role")
            .map(|r| LANDMARK_ROLES.iter().any(|l| r.eq_ignore_ascii_case(l)))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn select<'a>(doc: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
        let sel = Selector::parse(css).unwrap();
        doc.select(&sel).collect()
    }

    #[test]
    fn test_form_wins() {
        let doc = Html::parse_document(
            r#"<body><div class="login-panel"><form id="f"><div><input type="password"></div></form></div></body>"#,
        );
        let input = select(&doc, "input")[0];
        let container = closest_container(input, SINGLE_CONTAINER_MAX_TEXT).unwrap();
        assert_eq!(container.value().attr("id"), Some("f"));
    }

    #[test]
    fn test_keyword_ancestor_without_form() {
        let doc = Html::parse_document(
            r#"<body><div id="outer"><div class="auth-card"><span><input type="email"></span></div></div></body>"#,
        );
        let input = select(&doc, "input")[0];
        let container = closest_container(input, SINGLE_CONTAINER_MAX_TEXT).unwrap();
        assert_eq!(container.value().attr("class"), Some("auth-card"));
    }

    #[test]
    fn test_landmark_ancestor() {
        let doc = Html::parse_document(
            r#"<body><section id="s"><div><div><button>Sign in</button></div></div></section></body>"#,
        );
        let button = select(&doc, "button")[0];
        let container = closest_container(button, SINGLE_CONTAINER_MAX_TEXT).unwrap();
        assert_eq!(container.value().attr("id"), Some("s"));
    }

    #[test]
    fn test_blind_ascent_stops_below_body() {
        let doc = Html::parse_document(
            r#"<body><div id="a"><div id="b"><div id="c"><div id="d"><a>Log in</a></div></div></div></div></body>"#,
        );
        let link = select(&doc, "a")[0];
        let container = closest_container(link, SINGLE_CONTAINER_MAX_TEXT).unwrap();
        assert_eq!(container.value().attr("id"), Some("b"));

        let shallow = Html::parse_document(r#"<body><div id="top"><a>Log in</a></div></body>"#);
        let link = select(&shallow, "a")[0];
        let container = closest_container(link, SINGLE_CONTAINER_MAX_TEXT).unwrap();
        assert_eq!(container.value().attr("id"), Some("top"));
    }

    #[test]
    fn test_oversized_container_rejected() {
        let filler = "word ".repeat(3_000);
        let doc = Html::parse_document(&format!(
            r#"<body><form><p>{filler}</p><input type="password"></form></body>"#
        ));
        let input = select(&doc, "input")[0];
        assert!(closest_container(input, SINGLE_CONTAINER_MAX_TEXT).is_none());
        assert!(closest_container(input, 20_000).is_some());
    }

    #[test]
    fn test_lca_of_siblings() {
        let doc = Html::parse_document(
            r#"<body><div id="panel"><form><input type="password"></form><div class="social"><button>Google</button><button>Apple</button></div></div></body>"#,
        );
        let mut hits = select(&doc, "input");
        hits.extend(select(&doc, "button"));
        let lca = lowest_common_ancestor(&hits).unwrap();
        assert_eq!(lca.value().attr("id"), Some("panel"));

        let buttons = select(&doc, "button");
        let lca = lowest_common_ancestor(&buttons).unwrap();
        assert_eq!(lca.value().attr("class"), Some("social"));

        let single = lowest_common_ancestor(&buttons[..1]).unwrap();
        assert_eq!(single.value().name(), "button");
        assert!(lowest_common_ancestor(&[]).is_none());
    }

    #[test]
    fn test_common_container_rejects_main() {
        let doc = Html::parse_document(
            r#"<body><main><form><input type="password"></form><div><button>Google</button></div></main></body>"#,
        );
        let mut hits = select(&doc, "input");
        hits.extend(select(&doc, "button"));
        assert_eq!(
            common_container(&hits, PAGE_CONTAINER_MAX_TEXT).unwrap_err(),
            ContainmentFailure::TopLevel("main".into())
        );
    }

    #[test]
    fn test_common_container_rejects_oversized() {
        let filler = "lorem ".repeat(4_000);
        let doc = Html::parse_document(&format!(
            r#"<body><div id="wrap"><p>{filler}</p><form><input type="password"></form><button>GitHub</button></div></body>"#
        ));
        let mut hits = select(&doc, "input");
        hits.extend(select(&doc, "button"));
        match common_container(&hits, PAGE_CONTAINER_MAX_TEXT) {
            Err(ContainmentFailure::Oversized { limit, .. }) => {
                assert_eq!(limit, PAGE_CONTAINER_MAX_TEXT)
            }
            other => panic!("expected oversized, got {other:?}"),
        }
    }

    #[test]
    fn test_text_length_ignores_scripts() {
        let doc = Html::parse_document(
            "<body><div id='x'>  hello  <script>var a = 'lots of code';</script><b>hi</b></div></body>",
        );
        let div = select(&doc, "#x")[0];
        assert_eq!(text_length(&div), 7);
    }
}
