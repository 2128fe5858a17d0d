//! Verbose request/response tracing with token redaction.
//!
//! Trace lines go to the `kwapi::trace` target so they can be enabled
//! independently of ordinary debug logging.

use serde_json::Value;

const HIDDEN: &str = "[HIDDEN]";
const SECRET_KEYS: [&str; 4] = ["access_token", "refresh_token", "client_secret", "password"];

/// Replaces token and credential values anywhere in a JSON document.
fn redact_tokens(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) {
                    *entry = Value::String(HIDDEN.to_string());
                } else {
                    redact_tokens(entry);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_tokens),
        _ => {}
    }
}

/// Renders a body for tracing: pretty JSON with secrets hidden, or the raw text.
pub(crate) fn trace_body(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(mut value) => {
            redact_tokens(&mut value);
            serde_json::to_string_pretty(&value).unwrap_or_default()
        }
        Err(_) => redact_form(&String::from_utf8_lossy(body)),
    }
}

/// Hides secret fields of a form-encoded body.
fn redact_form(text: &str) -> String {
    if !text.contains('=') {
        return text.to_string();
    }
    text.split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if SECRET_KEYS.contains(&key) => format!("{key}={HIDDEN}"),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}
