//! Inference response parsing.
//!
//! The service returns free text that usually, but not always, wraps a JSON
//! object. The first balanced `{...}` region is cut out, cleaned of comments
//! and trailing commas, and validated against a fixed schema. Any violation
//! rejects the whole response.

use crate::error::ResponseFormatError;
use crate::types::{AuthComponent, ComponentDetails};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawResponse {
    components: Vec<RawComponent>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    details: Value,
    #[serde(default)]
    selector: Option<Value>,
}

/// Parse a raw inference response into candidate components.
pub fn parse_response(text: &str) -> Result<Vec<AuthComponent>, ResponseFormatError> {
    let region = first_json_object(text).ok_or(ResponseFormatError::NoJson)?;
    let cleaned = strip_json_noise(region);
    let value: Value = serde_json::from_str(&cleaned)?;

    let raw: RawResponse = serde_json::from_value(value)
        .map_err(|e| ResponseFormatError::Schema(e.to_string()))?;

    raw.components.into_iter().map(coerce_component).collect()
}

fn coerce_component(raw: RawComponent) -> Result<AuthComponent, ResponseFormatError> {
    let details = match raw.kind.trim().to_ascii_lowercase().as_str() {
        "traditional" => ComponentDetails::Traditional {
            fields: optional_string_list(&raw.details, "fields")?,
        },
        "oauth" => {
            let providers: Vec<String> = string_list(&raw.details, "providers")?
                .into_iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect();
            if providers.is_empty() {
                return Err(ResponseFormatError::Schema(
                    "oauth component without providers".into(),
                ));
            }
            ComponentDetails::Oauth { providers }
        }
        "passwordless" => {
            let method = raw
                .details
                .get("method")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .ok_or_else(|| {
                    ResponseFormatError::Schema("passwordless component without method".into())
                })?;
            ComponentDetails::Passwordless {
                method: method.to_lowercase(),
            }
        }
        other => {
            return Err(ResponseFormatError::Schema(format!(
                "unknown component type {other:?}"
            )))
        }
    };

    let selector = match raw.selector.or_else(|| raw.details.get("selector").cloned()) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            return Err(ResponseFormatError::Schema(format!(
                "selector must be a string, got {other}"
            )))
        }
    };

    Ok(AuthComponent::new(details, selector))
}

fn string_list(details: &Value, key: &str) -> Result<Vec<String>, ResponseFormatError> {
    let items = details
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ResponseFormatError::Schema(format!("details.{key} must be a list")))?;
    items
        .iter()
        .map(|v| {
            v.as_str().map(str::to_string).ok_or_else(|| {
                ResponseFormatError::Schema(format!("details.{key} must hold strings"))
            })
        })
        .collect()
}

fn optional_string_list(details: &Value, key: &str) -> Result<Vec<String>, ResponseFormatError> {
    match details.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(_) => string_list(details, key),
    }
}

/// First balanced `{...}` region, ignoring braces inside strings.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove `//` and `/* */` comments, then trailing commas, outside strings.
pub fn strip_json_noise(json: &str) -> String {
    strip_trailing_commas(&strip_comments(json))
}

/// Walks `json` and calls `f` for every character outside a string literal.
/// `f` returns how many characters to consume and whether to keep them.
fn rewrite_outside_strings(json: &str, mut f: impl FnMut(&[char], usize) -> (usize, bool)) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        if ch == '"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }

        let (consumed, keep) = f(&chars, i);
        if keep {
            out.extend(&chars[i..(i + consumed).min(chars.len())]);
        }
        i += consumed.max(1);
    }
    out
}

fn strip_comments(json: &str) -> String {
    rewrite_outside_strings(json, |chars, i| match (chars[i], chars.get(i + 1)) {
        ('/', Some('/')) => {
            let len = chars[i..].iter().position(|c| *c == '\n').unwrap_or(chars.len() - i);
            (len, false)
        }
        ('/', Some('*')) => {
            let len = chars[i + 2..]
                .windows(2)
                .position(|w| w == ['*', '/'])
                .map(|p| p + 4)
                .unwrap_or(chars.len() - i);
            (len, false)
        }
        _ => (1, true),
    })
}

fn strip_trailing_commas(json: &str) -> String {
    rewrite_outside_strings(json, |chars, i| {
        if chars[i] != ',' {
            return (1, true);
        }
        let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
        (1, !matches!(next, Some('}') | Some(']')))
    })
}
