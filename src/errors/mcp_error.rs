use crate::errors::{ToolError, ToolErrorKind};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    RequestTimeout = -32001,
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct McpError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Renders a tool failure as the structured text block agents read.
    pub fn from_tool_error(tool: &str, error: &ToolError) -> Self {
        let mut lines = vec![
            "InfraMcpError".to_string(),
            format!("tool: {}", tool),
            format!("kind: {}", error.kind.as_str()),
            format!("code: {}", error.code),
            format!("retryable: {}", error.retryable),
            format!("message: {}", error.message),
        ];
        if let Some(hint) = &error.hint {
            lines.push(format!("hint: {}", hint));
        }
        let message = lines.join("\n");

        let code = match error.kind {
            ToolErrorKind::InvalidParams | ToolErrorKind::SchemeMismatch => {
                ErrorCode::InvalidParams
            }
            ToolErrorKind::TransientNetwork => ErrorCode::RequestTimeout,
            ToolErrorKind::AuthInvalid | ToolErrorKind::ApiError => ErrorCode::InvalidRequest,
            _ => ErrorCode::InternalError,
        };
        McpError::new(code, message).with_data(json!({
            "tool": tool,
            "kind": error.kind.as_str(),
            "code": error.code,
            "retryable": error.retryable,
        }))
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for McpError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_renders_kind_and_hint() {
        let err = ToolError::auth_invalid("token rejected").with_hint("rotate the token");
        let mapped = McpError::from_tool_error("health_check", &err);
        assert_eq!(mapped.code, ErrorCode::InvalidRequest);
        assert!(mapped.message.contains("kind: auth_invalid"));
        assert!(mapped.message.contains("hint: rotate the token"));
        let data = mapped.data.expect("structured data");
        assert_eq!(data["kind"], "auth_invalid");
        assert_eq!(data["retryable"], false);
    }

    #[test]
    fn scheme_mismatch_is_an_argument_problem() {
        let mapped = McpError::from_tool_error("api_request", &ToolError::scheme_mismatch("x"));
        assert_eq!(mapped.code, ErrorCode::InvalidParams);
    }
}
