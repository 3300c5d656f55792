use crate::models::SecretValue;
use crate::utils::text::truncate_utf8_prefix;
use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passphrase",
    "secret",
    "token",
    "api_key",
    "apikey",
    "access_token",
    "bearer_token",
    "client_secret",
    "authorization",
    "proxy-authorization",
    "x-api-key",
    "encryption_key",
    "credentials",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    SENSITIVE_KEYS.contains(&normalized.as_str())
        || normalized.contains("secret")
        || normalized.contains("token")
}

/// Replaces every occurrence of a known secret value. Blank values are
/// skipped so they cannot blank out the whole text.
pub fn mask_secrets(text: &str, secrets: &[SecretValue]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_blank())
        .fold(text.to_string(), |acc, secret| acc.replace(secret.expose(), REDACTED))
}

fn truncate(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    format!("{}...", truncate_utf8_prefix(value, max_length))
}

/// Log-safe copy of a JSON value: sensitive keys are masked at any depth and
/// long strings are cut at `max_string` bytes.
pub fn redact_object(value: &Value, max_string: usize) -> Value {
    match value {
        Value::String(text) => Value::String(truncate(text, max_string)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_object(item, max_string))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, entry)| {
                    let masked = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_object(entry, max_string)
                    };
                    (key.clone(), masked)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sensitive_keys_are_masked() {
        let input = serde_json::json!({
            "api_name": "github",
            "headers": {"Authorization": "Bearer abc", "Accept": "json"},
            "params": {"series_id": "GDPC1", "api_key": "XYZ"}
        });
        let out = redact_object(&input, 2048);
        assert_eq!(out["headers"]["Authorization"], REDACTED);
        assert_eq!(out["headers"]["Accept"], "json");
        assert_eq!(out["params"]["api_key"], REDACTED);
        assert_eq!(out["params"]["series_id"], "GDPC1");
    }

    #[test]
    fn long_strings_are_truncated() {
        let out = redact_object(&Value::String("abcdef".to_string()), 3);
        assert_eq!(out, Value::String("abc...".to_string()));
    }

    #[test]
    fn known_values_are_masked_in_text() {
        let secrets = vec![SecretValue::new("XYZ-123"), SecretValue::new("  ")];
        assert_eq!(
            mask_secrets("key=XYZ-123&x=1", &secrets),
            "key=[REDACTED]&x=1"
        );
    }
}
