//! Server-side `$S{key}` substitution, applied after regular interpolation.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;
use yd_core::EnvData;

fn secret_regex() -> &'static Regex {
    static SECRET: OnceLock<Regex> = OnceLock::new();
    SECRET.get_or_init(|| Regex::new(r"\$S\{([^}]*)\}").expect("secret regex must compile"))
}

/// Replaces `$S{key}` in every string leaf. Unknown keys stay verbatim.
pub fn interpolate_secrets(value: &Value, secrets: &EnvData) -> Value {
    match value {
        Value::String(text) => Value::String(replace_secrets(text, secrets)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_secrets(item, secrets))
                .collect(),
        ),
        Value::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), interpolate_secrets(item, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn replace_secrets(text: &str, secrets: &EnvData) -> String {
    if !text.contains("$S{") {
        return text.to_string();
    }
    secret_regex()
        .replace_all(text, |captures: &Captures| {
            let key = captures[1].trim();
            secrets
                .get(key)
                .cloned()
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}
