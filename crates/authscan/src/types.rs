//! Core data types for detected authentication components and results.

use serde::{Deserialize, Serialize};

/// OAuth / SSO providers recognised across every detection path.
///
/// Order matters only for output stability: detectors report providers in
/// this order when several match.
pub const OAUTH_PROVIDERS: &[&str] = &[
    "google",
    "apple",
    "facebook",
    "microsoft",
    "github",
    "gitlab",
    "okta",
    "auth0",
    "linkedin",
    "twitter",
    "bitbucket",
    "sso",
];

/// Custom element used by hosted authentication widgets.
pub const AUTH_WIDGET_TAG: &str = "descope-wc";

/// The three kinds of authentication affordance the pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Traditional,
    Oauth,
    Passwordless,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Traditional => "traditional",
            ComponentType::Oauth => "oauth",
            ComponentType::Passwordless => "passwordless",
        }
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific metadata for a component.
///
/// Serialised untagged so the JSON shape matches the component type:
/// `{"fields": [...]}`, `{"providers": [...]}` or `{"method": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentDetails {
    Traditional { fields: Vec<String> },
    Oauth { providers: Vec<String> },
    Passwordless { method: String },
}

impl ComponentDetails {
    pub fn component_type(&self) -> ComponentType {
        match self {
            ComponentDetails::Traditional { .. } => ComponentType::Traditional,
            ComponentDetails::Oauth { .. } => ComponentType::Oauth,
            ComponentDetails::Passwordless { .. } => ComponentType::Passwordless,
        }
    }

    /// Providers named by an OAuth component; empty for other types.
    pub fn providers(&self) -> &[String] {
        match self {
            ComponentDetails::Oauth { providers } => providers,
            _ => &[],
        }
    }

    /// Field names of a traditional component; empty for other types.
    pub fn fields(&self) -> &[String] {
        match self {
            ComponentDetails::Traditional { fields } => fields,
            _ => &[],
        }
    }
}

/// A detected authentication affordance.
///
/// The type is fixed at construction (it is derived from `details`, which is
/// private), and the snippet is attached once by the snippet resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthComponent {
    #[serde(rename = "type")]
    kind: ComponentType,
    details: ComponentDetails,
    /// Location description used to re-find the element in the live page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snippet: Option<String>,
}

impl AuthComponent {
    pub fn new(details: ComponentDetails, selector: Option<String>) -> Self {
        Self {
            kind: details.component_type(),
            details,
            selector: selector.filter(|s| !s.trim().is_empty()),
            snippet: None,
        }
    }

    pub fn traditional(fields: Vec<String>) -> Self {
        Self::new(ComponentDetails::Traditional { fields }, None)
    }

    pub fn oauth(providers: Vec<String>) -> Self {
        Self::new(ComponentDetails::Oauth { providers }, None)
    }

    pub fn passwordless(method: impl Into<String>) -> Self {
        Self::new(
            ComponentDetails::Passwordless {
                method: method.into(),
            },
            None,
        )
    }

    pub fn kind(&self) -> ComponentType {
        self.kind
    }

    pub fn details(&self) -> &ComponentDetails {
        &self.details
    }

    pub fn snippet(&self) -> Option<&str> {
        self.snippet.as_deref()
    }

    /// Attach the resolved snippet. Returns `false` (and keeps the existing
    /// snippet) if one was already attached.
    pub fn attach_snippet(&mut self, snippet: String) -> bool {
        if self.snippet.is_some() {
            return false;
        }
        self.snippet = Some(snippet);
        true
    }
}

/// Which detection path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Ai,
    Pattern,
}

/// Terminal output of the detection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub success: bool,
    found: bool,
    components: Vec<AuthComponent>,
    pub detection_method: DetectionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Combined container for the whole widget, from the heuristic path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_snippet: Option<String>,
}

impl DetectionResult {
    /// A successful result. `found` is derived from the component list.
    pub fn completed(components: Vec<AuthComponent>, method: DetectionMethod) -> Self {
        let found = !components.is_empty();
        let message = if found {
            None
        } else {
            Some("No authentication components were detected on this page".to_string())
        };
        Self {
            success: true,
            found,
            components,
            detection_method: method,
            message,
            url: None,
            title: None,
            widget_snippet: None,
        }
    }

    /// An unrecoverable pipeline failure.
    pub fn failure(message: impl Into<String>, method: DetectionMethod) -> Self {
        Self {
            success: false,
            found: false,
            components: Vec::new(),
            detection_method: method,
            message: Some(message.into()),
            url: None,
            title: None,
            widget_snippet: None,
        }
    }

    pub fn found(&self) -> bool {
        self.found
    }

    pub fn components(&self) -> &[AuthComponent] {
        &self.components
    }

    pub fn into_components(self) -> Vec<AuthComponent> {
        self.components
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_follows_details() {
        let c = AuthComponent::oauth(vec!["google".into()]);
        assert_eq!(c.kind(), ComponentType::Oauth);
        assert_eq!(c.details().providers(), ["google".to_string()]);
        assert!(c.details().fields().is_empty());
    }

    #[test]
    fn test_snippet_attaches_once() {
        let mut c = AuthComponent::passwordless("passkey");
        assert!(c.attach_snippet("<button>Use passkey</button>".into()));
        assert!(!c.attach_snippet("<div></div>".into()));
        assert_eq!(c.snippet(), Some("<button>Use passkey</button>"));
    }

    #[test]
    fn test_blank_selector_dropped() {
        let c = AuthComponent::new(
            ComponentDetails::Traditional { fields: vec![] },
            Some("   ".into()),
        );
        assert!(c.selector.is_none());
    }

    #[test]
    fn test_found_matches_components() {
        let empty = DetectionResult::completed(vec![], DetectionMethod::Pattern);
        assert!(empty.success);
        assert!(!empty.found());
        assert!(empty.message.is_some());

        let one = DetectionResult::completed(
            vec![AuthComponent::traditional(vec!["password".into()])],
            DetectionMethod::Ai,
        );
        assert!(one.found());
        assert_eq!(one.components().len(), 1);
    }

    #[test]
    fn test_result_json_shape() {
        let mut c = AuthComponent::oauth(vec!["github".into()]);
        c.attach_snippet("<a>GitHub</a>".into());
        let result = DetectionResult::completed(vec![c], DetectionMethod::Pattern);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["detectionMethod"], "pattern");
        assert_eq!(json["found"], true);
        assert_eq!(json["components"][0]["type"], "oauth");
        assert_eq!(json["components"][0]["details"]["providers"][0], "github");
        assert_eq!(json["components"][0]["snippet"], "<a>GitHub</a>");
    }
}
