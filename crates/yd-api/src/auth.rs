//! `Authorization` header derived from request or collection auth settings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};
use yd_core::AuthData;

fn text<'a>(fields: &'a Map<String, Value>, section: &str, key: &str) -> Option<&'a str> {
    fields
        .get(section)
        .and_then(|nested| nested.get(key))
        .or_else(|| fields.get(key))
        .and_then(Value::as_str)
}

/// `Basic` for `type: "basic"`, `Bearer` for `"bearer"` and `"oauth2"`.
/// Returns `None` when auth is disabled or incomplete.
pub fn authorization_header(auth: &AuthData) -> Option<String> {
    if !auth.enabled {
        return None;
    }
    let kind = auth.fields.get("type").and_then(Value::as_str)?;
    match kind.to_ascii_lowercase().as_str() {
        "basic" => {
            let username = text(&auth.fields, "basic", "username")?;
            let password = text(&auth.fields, "basic", "password").unwrap_or("");
            Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", username, password))
            ))
        }
        "bearer" => text(&auth.fields, "bearer", "token").map(|token| format!("Bearer {}", token)),
        "oauth2" => text(&auth.fields, "oauth2", "accessToken")
            .map(|token| format!("Bearer {}", token)),
        _ => None,
    }
}
