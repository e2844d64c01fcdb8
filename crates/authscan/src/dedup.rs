//! Component deduplication.

use crate::types::{AuthComponent, ComponentType};
use std::collections::HashSet;

/// Snippet prefix length that makes two components the same.
pub const DEDUP_PREFIX_CHARS: usize = 100;

const NO_SNIPPET: &str = "no-snippet";

/// Keep the first component per `(type, snippet prefix)`, preserving order.
/// Components without a snippet share one key per type.
pub fn dedup_components(components: Vec<AuthComponent>) -> Vec<AuthComponent> {
    let mut seen: HashSet<(ComponentType, String)> = HashSet::new();
    components
        .into_iter()
        .filter(|c| seen.insert(dedup_key(c)))
        .collect()
}

fn dedup_key(component: &AuthComponent) -> (ComponentType, String) {
    let prefix = match component.snippet() {
        Some(snippet) => snippet.chars().take(DEDUP_PREFIX_CHARS).collect(),
        None => NO_SNIPPET.to_string(),
    };
    (component.kind(), prefix)
}
