//! Template substitution for destination payloads.
//!
//! Templates contain `{{dotted.path}}` or `{{{dotted.path}}}` tokens
//! resolved against the event's variable snapshot. Both delimiter forms
//! resolve identically; callers that need HTML-safety escape before
//! building the snapshot. Rendering never fails — unresolvable paths render
//! empty and malformed tokens stay literal.

use std::sync::OnceLock;

use regex::Regex;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

/// Triple-brace first so `{{{x}}}` is not consumed as `{{ {x} }}`.
fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| {
        Regex::new(r"\{\{\{([A-Za-z0-9_.]+)\}\}\}|\{\{([A-Za-z0-9_.]+)\}\}").unwrap()
    })
}

/// Render a template against a variable snapshot.
pub fn render(template: &str, vars: &serde_json::Value) -> String {
    token_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let path = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            resolve(vars, path)
        })
        .into_owned()
}

/// Walk the snapshot by dot-separated segments.
///
/// Missing or null segments resolve to empty; scalar leaves are stringified
/// without JSON quoting; composite leaves serialize as compact JSON.
fn resolve(vars: &serde_json::Value, path: &str) -> String {
    let mut current = vars;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(value) => current = value,
            None => return String::new(),
        }
    }

    match current {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
