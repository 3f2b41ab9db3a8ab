//! Secret redaction and payload sanitization.
//!
//! Anything that might carry a credential is scrubbed before it reaches a
//! log line, an error message, or a PR comment. Redaction happens at the
//! boundary where text leaves the component that produced it.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

pub const REDACTED: &str = "[REDACTED]";

/// Wholesale replacement for provider bodies in production mode.
pub const PRODUCTION_REDACTED: &str = "[Error details redacted in production]";

/// Free-text fields in logged payloads are cut to this many characters.
const TRUNCATE_AT: usize = 100;

/// Headers that contain security-sensitive values and must be redacted.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-goog-api-key",
    "x-hub-signature",
    "x-hub-signature-256",
];

static BEARER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").unwrap());
static PROVIDER_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sk-[A-Za-z0-9_-]{8,}").unwrap());
static LABELED_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bkey\s*:\s*[^\s"',;]+"#).unwrap());
static OPAQUE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_-]{32,}").unwrap());

/// Replace credential-shaped spans with [`REDACTED`].
///
/// Covers `Bearer ...` headers, `sk-...` provider keys, `key: ...` labeled
/// values, and any run of 32+ token characters (API keys and signatures are
/// long and opaque; prose almost never is).
pub fn redact_secrets(text: &str) -> String {
    let text = BEARER.replace_all(text, REDACTED);
    let text = PROVIDER_KEY.replace_all(&text, REDACTED);
    let text = LABELED_KEY.replace_all(&text, REDACTED);
    OPAQUE_TOKEN.replace_all(&text, REDACTED).into_owned()
}

pub struct Sanitizer;

impl Sanitizer {
    /// Check if a header name is sensitive and should be redacted.
    pub fn is_sensitive_header(header_name: &str) -> bool {
        let lower = header_name.to_lowercase();
        SENSITIVE_HEADERS.contains(&lower.as_str())
    }

    /// Remove sensitive data from headers.
    pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        let mut sanitized = HashMap::new();
        for (key, value) in headers {
            let sanitized_value = if Self::is_sensitive_header(key) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            sanitized.insert(key.clone(), sanitized_value);
        }
        sanitized
    }

    /// Remove secrets from a JSON payload and truncate free-text fields so
    /// log lines stay bounded.
    pub fn sanitize_json(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut sanitized = serde_json::Map::new();
                for (key, val) in map {
                    let sanitized_val = match key.as_str() {
                        "token" | "private_key" | "secret" | "password" | "api_key" => {
                            Value::String(REDACTED.to_string())
                        }
                        "title" | "body" => match val {
                            Value::String(s) => Value::String(truncate(s, TRUNCATE_AT)),
                            other => Self::sanitize_json(other),
                        },
                        _ => Self::sanitize_json(val),
                    };
                    sanitized.insert(key.clone(), sanitized_val);
                }
                Value::Object(sanitized)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(Self::sanitize_json).collect()),
            _ => value.clone(),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_bearer_tokens() {
        let out = redact_secrets("Authorization: Bearer ghp_abc123XYZ failed");
        assert!(!out.contains("ghp_abc123XYZ"));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn test_redacts_sk_keys() {
        let out = redact_secrets("error from provider: invalid sk-proj-a1b2c3d4e5");
        assert!(!out.contains("sk-proj-a1b2c3d4e5"));
    }

    #[test]
    fn test_redacts_labeled_keys() {
        let out = redact_secrets("request rejected, key: abc123 is expired");
        assert!(!out.contains("abc123"));
    }

    #[test]
    fn test_redacts_long_opaque_tokens() {
        let token = "A".repeat(40);
        let out = redact_secrets(&format!("got 401 using {token} as credential"));
        assert!(!out.contains(&token));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn test_keeps_ordinary_prose() {
        let text = "connection refused while fetching the diff (31 bytes read)";
        assert_eq!(redact_secrets(text), text);
    }

    #[test]
    fn test_sensitive_headers_redacted() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer zzz".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        let out = Sanitizer::sanitize_headers(&headers);
        assert_eq!(out["Authorization"], REDACTED);
        assert_eq!(out["content-type"], "application/json");
    }

    #[test]
    fn test_sanitize_json_redacts_and_truncates() {
        let long_title = "t".repeat(300);
        let payload = json!({
            "action": "opened",
            "pull_request": {
                "title": long_title,
                "body": "short body"
            },
            "sender": { "token": "supersecret" }
        });
        let out = Sanitizer::sanitize_json(&payload);
        let title = out["pull_request"]["title"].as_str().unwrap();
        assert!(title.len() < 120);
        assert!(title.ends_with("..."));
        assert_eq!(out["pull_request"]["body"], "short body");
        assert_eq!(out["sender"]["token"], REDACTED);
    }
}
