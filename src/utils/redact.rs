use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_REDACTION: &str = "[REDACTED]";
const INLINE_REDACTION: &str = "***REDACTED***";

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password",
        "passwd",
        "secret",
        "token",
        "api_key",
        "apikey",
        "sid",
        "_sid",
        "ticket",
        "authorization",
        "cookie",
        "set-cookie",
        "csrfpreventiontoken",
    ]
    .into_iter()
    .collect()
});

static SENSITIVE_HEADER_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "authorization",
        "proxy-authorization",
        "x-api-key",
        "cookie",
        "set-cookie",
        "csrfpreventiontoken",
    ]
    .into_iter()
    .collect()
});

static INLINE_REDACTION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\bPVEAPIToken=[^\s&;,]+").expect("inline redaction regex"),
            "PVEAPIToken=***REDACTED***",
        ),
        (
            Regex::new(r"\bPVE:[A-Za-z0-9@!._-]+:[A-Za-z0-9:+/=._-]+").expect("inline redaction regex"),
            "PVE:***REDACTED***",
        ),
        (
            Regex::new(r"\bptr_[A-Za-z0-9+/=_-]{10,}").expect("inline redaction regex"),
            "ptr_***REDACTED***",
        ),
        (
            Regex::new(r"\bglsa_[A-Za-z0-9_]{10,}").expect("inline redaction regex"),
            "glsa_***REDACTED***",
        ),
        (
            Regex::new(r"\beyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\b")
                .expect("inline redaction regex"),
            INLINE_REDACTION,
        ),
        (
            Regex::new(r"\b(Bearer)\s+([A-Za-z0-9._~+/=-]{6,})").expect("inline redaction regex"),
            "$1 ***REDACTED***",
        ),
        (
            Regex::new(r"(?i)\b(x-api-key|cookie)\s*:\s*([^\r\n]+)").expect("inline redaction regex"),
            "$1: ***REDACTED***",
        ),
        (
            Regex::new(r#"\b(password|passwd|token|authtoken|api[_-]?key|secret|_sid|sid|ticket|PVEAuthCookie|CSRFPreventionToken|grafana_session)\b\s*([:=])\s*([^\s"'`&;,)]+)"#)
                .expect("inline redaction regex"),
            "$1$2***REDACTED***",
        ),
    ]
});

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = normalize_key(key);
    if normalized.is_empty() {
        return false;
    }
    if SENSITIVE_KEYS.contains(normalized.as_str()) {
        return true;
    }
    normalized.contains("secret") || normalized.contains("token") || normalized.contains("passw")
}

fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(value.len());
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn truncate_string(value: &str, max_length: usize) -> String {
    if max_length == usize::MAX {
        return value.to_string();
    }
    if max_length == 0 {
        return "".to_string();
    }
    if value.len() <= max_length {
        return value.to_string();
    }
    format!("{}...", truncate_utf8_prefix(value, max_length))
}

fn redact_inline_secrets(value: &str, extra: Option<&[String]>) -> String {
    let mut out = value.to_string();

    // Literal values go first so a pattern rewrite cannot leave a fragment behind.
    if let Some(values) = extra {
        for raw in values {
            let needle = raw.trim();
            if needle.is_empty() {
                continue;
            }
            out = out.replace(needle, INLINE_REDACTION);
            let encoded: String = url::form_urlencoded::byte_serialize(needle.as_bytes()).collect();
            if encoded != needle {
                out = out.replace(&encoded, INLINE_REDACTION);
            }
        }
    }

    for (re, replacement) in INLINE_REDACTION_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).to_string();
        }
    }

    out
}

pub fn redact_text(value: &str, max_string: usize, extra_secrets: Option<&[String]>) -> String {
    let redacted = redact_inline_secrets(value, extra_secrets);
    truncate_string(&redacted, max_string)
}

fn redact_headers(value: &Value, max_string: usize, extra: Option<&[String]>) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(map) = value.as_object() {
        for (key, entry) in map.iter() {
            let normalized = normalize_key(key);
            if SENSITIVE_HEADER_KEYS.contains(normalized.as_str()) {
                out.insert(key.clone(), Value::String(DEFAULT_REDACTION.to_string()));
            } else if let Some(text) = entry.as_str() {
                out.insert(
                    key.clone(),
                    Value::String(redact_text(text, max_string, extra)),
                );
            } else {
                out.insert(key.clone(), entry.clone());
            }
        }
    }
    Value::Object(out)
}

pub fn redact_object(value: &Value, max_string: usize, extra_secrets: Option<&[String]>) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(text) => Value::String(redact_text(text, max_string, extra_secrets)),
        Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_object(item, max_string, extra_secrets))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in map.iter() {
                if key == "headers" {
                    out.insert(
                        key.clone(),
                        redact_headers(entry, max_string, extra_secrets),
                    );
                    continue;
                }
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String(DEFAULT_REDACTION.to_string()));
                    continue;
                }
                out.insert(key.clone(), redact_object(entry, max_string, extra_secrets));
            }
            Value::Object(out)
        }
    }
}
