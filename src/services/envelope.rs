use crate::constants::limits::ERROR_BODY_CHARS;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

/// A backend response reduced to payload or error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Value),
    Err(BackendError),
}

impl Outcome {
    fn err(code: Option<String>, message: impl Into<String>) -> Self {
        Outcome::Err(BackendError {
            code,
            message: message.into(),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }
}

/// Response shape of one backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStyle {
    /// `{success, data, error: {code}}`, always HTTP 200.
    Synology,
    /// `{data}` on success, `{errors, message}` otherwise.
    Proxmox,
    Portainer,
    Authentik,
    Grafana,
}

impl EnvelopeStyle {
    pub fn normalize(self, status: u16, body: &Value) -> Outcome {
        let ok_status = (200..300).contains(&status);
        match self {
            EnvelopeStyle::Synology => synology(status, ok_status, body),
            EnvelopeStyle::Proxmox => proxmox(status, ok_status, body),
            EnvelopeStyle::Portainer => plain(status, ok_status, body, &["message", "details"]),
            EnvelopeStyle::Authentik => authentik(status, ok_status, body),
            EnvelopeStyle::Grafana => plain(status, ok_status, body, &["message", "error"]),
        }
    }

    /// Whether the backend rejected the credential or session rather than the request.
    pub fn is_auth_rejection(self, status: u16, outcome: &Outcome) -> bool {
        if status == 401 || status == 403 {
            return true;
        }
        match (self, outcome) {
            (EnvelopeStyle::Synology, Outcome::Err(err)) => matches!(
                err.code.as_deref(),
                Some("106") | Some("107") | Some("119")
            ),
            _ => false,
        }
    }

    /// Error for a failed login handshake, with the backend's own reason when known.
    pub fn login_failure(self, status: u16, body: &Value) -> BackendError {
        match (self, self.normalize(status, body)) {
            (EnvelopeStyle::Synology, Outcome::Err(err)) => {
                let message = err
                    .code
                    .as_deref()
                    .and_then(|c| c.parse::<i64>().ok())
                    .and_then(synology_auth_message)
                    .map(str::to_string)
                    .unwrap_or(err.message);
                BackendError {
                    code: err.code,
                    message,
                }
            }
            (_, Outcome::Err(err)) => err,
            (_, Outcome::Ok(_)) => BackendError {
                code: None,
                message: "Login response did not contain a session token".to_string(),
            },
        }
    }
}

fn synology(status: u16, ok_status: bool, body: &Value) -> Outcome {
    if !ok_status {
        return http_failure(status, body);
    }
    match body.get("success").and_then(Value::as_bool) {
        Some(true) => Outcome::Ok(body.get("data").cloned().unwrap_or(Value::Null)),
        Some(false) => {
            let code = body.pointer("/error/code").and_then(Value::as_i64);
            let message = code
                .and_then(synology_error_message)
                .map(str::to_string)
                .unwrap_or_else(|| match code {
                    Some(code) => format!("Unknown DSM error code {}", code),
                    None => "DSM reported failure without an error code".to_string(),
                });
            Outcome::err(code.map(|c| c.to_string()), message)
        }
        None => Outcome::err(None, "Response is not a DSM envelope"),
    }
}

fn synology_error_message(code: i64) -> Option<&'static str> {
    let message = match code {
        100 => "Unknown error",
        101 => "No parameter",
        102 => "API does not exist",
        103 => "Method does not exist",
        104 => "Version does not support",
        105 => "Insufficient user privilege",
        106 => "Session timeout",
        107 => "Session interrupted by duplicate login",
        119 => "Insufficient user privilege for SID",
        120 => "Invalid parameter",
        400 => "Invalid parameter (FileStation)",
        401 => "Unknown error (FileStation)",
        402 => "No such file or directory",
        403 => "Permission denied",
        404 => "File upload failed",
        405 => "Disk quota exceeded",
        406 => "No space left on device",
        407 => "Input/Output error",
        408 => "Illegal name or path",
        409 => "File exists",
        410 => "Disk quota exceeded",
        411 => "File size exceeds limit",
        412 => "Remote connection failed",
        _ => return None,
    };
    Some(message)
}

fn synology_auth_message(code: i64) -> Option<&'static str> {
    let message = match code {
        400 => "No such account or incorrect password",
        401 => "Account disabled",
        402 => "Account locked (too many failed attempts)",
        403 => "Account permission denied",
        404 => "2-factor authentication required",
        405 => "2-factor authentication failed",
        406 => "Enforce 2-factor authentication",
        407 => "Blocked IP",
        408 => "Expired password",
        409 => "Expired password (cannot change)",
        _ => return None,
    };
    Some(message)
}

fn proxmox(status: u16, ok_status: bool, body: &Value) -> Outcome {
    if ok_status {
        return Outcome::Ok(body.get("data").cloned().unwrap_or(Value::Null));
    }
    // Parameter errors come back as {"errors": {"field": "reason"}}.
    if let Some(errors) = body.get("errors").and_then(Value::as_object) {
        let parts: Vec<String> = errors
            .iter()
            .map(|(field, reason)| format!("{}: {}", field, value_text(reason)))
            .collect();
        if !parts.is_empty() {
            return Outcome::err(Some(status.to_string()), parts.join("; "));
        }
    }
    http_failure(status, body)
}

fn authentik(status: u16, ok_status: bool, body: &Value) -> Outcome {
    if ok_status {
        return Outcome::Ok(body.clone());
    }
    if let Some(detail) = body.get("detail").and_then(Value::as_str) {
        return Outcome::err(body.get("code").and_then(Value::as_str).map(str::to_string), detail);
    }
    // Validation errors map field names to lists of messages.
    if let Some(fields) = body.as_object() {
        let parts: Vec<String> = fields
            .iter()
            .filter_map(|(field, reasons)| {
                let reasons = reasons.as_array()?;
                let joined: Vec<String> = reasons.iter().map(value_text).collect();
                Some(format!("{}: {}", field, joined.join(", ")))
            })
            .collect();
        if !parts.is_empty() {
            return Outcome::err(None, parts.join("; "));
        }
    }
    http_failure(status, body)
}

fn plain(status: u16, ok_status: bool, body: &Value, keys: &[&str]) -> Outcome {
    if ok_status {
        return Outcome::Ok(body.clone());
    }
    let parts: Vec<String> = keys
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        return http_failure(status, body);
    }
    Outcome::err(None, format!("HTTP {}: {}", status, parts.join(": ")))
}

fn http_failure(status: u16, body: &Value) -> Outcome {
    let message = match body {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    };
    let message = truncate_chars(message.trim(), ERROR_BODY_CHARS);
    if message.is_empty() {
        Outcome::err(None, format!("HTTP {}", status))
    } else {
        Outcome::err(None, format!("HTTP {}: {}", status, message))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synology_unwraps_data_and_maps_codes() {
        let ok = EnvelopeStyle::Synology.normalize(200, &json!({"success": true, "data": {"model": "DS920+"}}));
        assert_eq!(ok, Outcome::Ok(json!({"model": "DS920+"})));

        let err = EnvelopeStyle::Synology.normalize(200, &json!({"success": false, "error": {"code": 105}}));
        assert_eq!(
            err,
            Outcome::Err(BackendError {
                code: Some("105".to_string()),
                message: "Insufficient user privilege".to_string(),
            })
        );
    }

    #[test]
    fn synology_session_codes_are_auth_rejections() {
        let style = EnvelopeStyle::Synology;
        let expired = style.normalize(200, &json!({"success": false, "error": {"code": 119}}));
        assert!(style.is_auth_rejection(200, &expired));
        let denied = style.normalize(200, &json!({"success": false, "error": {"code": 105}}));
        assert!(!style.is_auth_rejection(200, &denied));
    }

    #[test]
    fn synology_login_failures_use_auth_table() {
        let err = EnvelopeStyle::Synology
            .login_failure(200, &json!({"success": false, "error": {"code": 400}}));
        assert_eq!(err.message, "No such account or incorrect password");
    }

    #[test]
    fn proxmox_flattens_parameter_errors() {
        let outcome = EnvelopeStyle::Proxmox.normalize(
            400,
            &json!({"data": null, "errors": {"vmid": "value must be at least 100"}}),
        );
        match outcome {
            Outcome::Err(err) => assert_eq!(err.message, "vmid: value must be at least 100"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            EnvelopeStyle::Proxmox.normalize(200, &json!({"data": {"version": "8.1"}})),
            Outcome::Ok(json!({"version": "8.1"}))
        );
    }

    #[test]
    fn authentik_reads_detail_then_field_errors() {
        let outcome = EnvelopeStyle::Authentik.normalize(403, &json!({"detail": "Token invalid"}));
        assert!(matches!(outcome, Outcome::Err(ref e) if e.message == "Token invalid"));
        let outcome =
            EnvelopeStyle::Authentik.normalize(400, &json!({"slug": ["This field is required."]}));
        assert!(matches!(outcome, Outcome::Err(ref e) if e.message == "slug: This field is required."));
    }

    #[test]
    fn non_json_error_bodies_are_truncated() {
        let body = Value::String("x".repeat(2000));
        match EnvelopeStyle::Grafana.normalize(502, &body) {
            Outcome::Err(err) => {
                assert!(err.message.starts_with("HTTP 502: "));
                assert_eq!(err.message.len(), "HTTP 502: ".len() + ERROR_BODY_CHARS);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn portainer_joins_message_and_details() {
        let outcome = EnvelopeStyle::Portainer
            .normalize(404, &json!({"message": "Unable to find an endpoint", "details": "not found"}));
        assert!(matches!(
            outcome,
            Outcome::Err(ref e) if e.message == "HTTP 404: Unable to find an endpoint: not found"
        ));
    }
}
