use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    ConfigIncomplete,
    SecretStoreUnavailable,
    AuthInvalid,
    TransientNetwork,
    ApiError,
    SchemeMismatch,
    InvalidParams,
    Internal,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorKind::ConfigIncomplete => "config_incomplete",
            ToolErrorKind::SecretStoreUnavailable => "secret_store_unavailable",
            ToolErrorKind::AuthInvalid => "auth_invalid",
            ToolErrorKind::TransientNetwork => "transient_network",
            ToolErrorKind::ApiError => "api_error",
            ToolErrorKind::SchemeMismatch => "scheme_mismatch",
            ToolErrorKind::InvalidParams => "invalid_params",
            ToolErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, ToolErrorKind::TransientNetwork),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Missing required configuration. Carries field names only.
    pub fn config_incomplete(product: &str, missing: &[&str]) -> Self {
        let fields: Vec<String> = missing.iter().map(|s| s.to_string()).collect();
        Self::new(
            ToolErrorKind::ConfigIncomplete,
            "CONFIG_INCOMPLETE",
            format!(
                "{} configuration is incomplete: missing {}",
                product,
                fields.join(", ")
            ),
        )
        .with_details(serde_json::json!({ "product": product, "missing_fields": fields }))
    }

    pub fn secret_store_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::SecretStoreUnavailable,
            "SECRET_STORE_UNAVAILABLE",
            message,
        )
        .with_hint("Unlock the platform keychain or run with --no-keychain and use env vars.")
    }

    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::AuthInvalid, "AUTH_INVALID", message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::TransientNetwork, "TRANSIENT_NETWORK", message)
    }

    pub fn api_error(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        let code = code
            .map(|c| format!("API_{}", c))
            .unwrap_or_else(|| format!("HTTP_{}", status));
        Self::new(ToolErrorKind::ApiError, code, message)
            .with_details(serde_json::json!({ "status": status }))
    }

    pub fn scheme_mismatch(path: &str) -> Self {
        Self::new(
            ToolErrorKind::SchemeMismatch,
            "SCHEME_MISMATCH",
            format!("No auth scheme is registered for path '{}'", path),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, "INTERNAL", message)
    }

    /// Process exit status used when this error aborts startup.
    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ToolErrorKind::ConfigIncomplete => 2,
            ToolErrorKind::SecretStoreUnavailable => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ToolError::transient("reset").retryable);
        assert!(!ToolError::auth_invalid("nope").retryable);
        assert!(!ToolError::api_error(404, None, "missing").retryable);
    }

    #[test]
    fn config_incomplete_lists_field_names() {
        let err = ToolError::config_incomplete("proxmox", &["url", "token"]);
        assert_eq!(err.kind, ToolErrorKind::ConfigIncomplete);
        assert!(err.message.contains("url, token"));
        let details = err.details.expect("details");
        assert_eq!(details["missing_fields"], serde_json::json!(["url", "token"]));
    }

    #[test]
    fn exit_codes_follow_startup_failure_kind() {
        assert_eq!(ToolError::config_incomplete("grafana", &["url"]).exit_code(), 2);
        assert_eq!(ToolError::secret_store_unavailable("locked").exit_code(), 3);
        assert_eq!(ToolError::internal("boom").exit_code(), 1);
    }

    #[test]
    fn api_error_code_prefers_backend_code() {
        assert_eq!(ToolError::api_error(200, Some("105"), "x").code, "API_105");
        assert_eq!(ToolError::api_error(404, None, "x").code, "HTTP_404");
    }
}
