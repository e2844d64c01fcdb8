//! Prompt text for the inference service.

/// Build the classification prompt for one page.
pub fn build_prompt(url: &str, excerpt: &str, with_screenshot: bool) -> String {
    let screenshot_note = if with_screenshot {
        "A screenshot of the rendered page is attached; use it to confirm what is actually visible.\n"
    } else {
        ""
    };

    format!(
        r#"You are analysing a web page for authentication user interface.
Page URL: {url}
{screenshot_note}
Identify every authentication component on the page. There are exactly three component types:
- "traditional": a username/email and password login form. Details: "fields", the list of input fields (for example ["email", "password"]).
- "oauth": buttons or links that sign in through an external identity provider or SSO. Details: "providers", lower-case provider names (for example ["google", "apple"]).
- "passwordless": passkey / WebAuthn, magic link, or one-time code sign-in. Details: "method", one of "passkey", "magic-link", "otp".

For each component also give "selector": a short description of how to find it in the live page, such as a CSS selector (`css=form#login`), visible text (`text="Continue with Google"`), or a CSS selector with text (`button:has-text("Sign in")`). Use null if you cannot describe it.

Respond with a single JSON object and nothing else, in exactly this shape:
{{"components": [{{"type": "traditional", "details": {{"fields": ["email", "password"]}}, "selector": "css=form#login"}}]}}
If the page has no authentication UI, respond with {{"components": []}}.

Relevant HTML from the page:
```html
{excerpt}
```"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_mentions_all_types_and_input() {
        let prompt = build_prompt("https://example.com/login", "<form>x</form>", true);
        for needle in [
            "\"traditional\"",
            "\"oauth\"",
            "\"passwordless\"",
            "https://example.com/login",
            "<form>x</form>",
            "screenshot",
            r#"{"components": []}"#,
        ] {
            assert!(prompt.contains(needle), "missing {needle}");
        }
        assert!(!build_prompt("u", "e", false).contains("screenshot of the rendered page"));
    }
}
