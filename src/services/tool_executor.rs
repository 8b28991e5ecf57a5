use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::redact::redact_object;
use crate::utils::tool_errors::unknown_tool_error;

use serde_json::Value;

const MAX_RESULT_STRING: usize = 64 * 1024;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value) -> Result<Value, ToolError>;
}

#[derive(Clone)]
pub struct ToolExecutor {
    logger: Logger,
    handlers: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
    secrets: Arc<Vec<String>>,
}

#[derive(Clone)]
pub(crate) struct ToolCallMeta {
    pub started_at: i64,
    pub trace_id: String,
    pub span_id: String,
}

impl ToolExecutor {
    pub fn new(logger: Logger, handlers: HashMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            logger: logger.child("executor"),
            handlers: Arc::new(handlers),
            secrets: Arc::new(Vec::new()),
        }
    }

    /// Literal values scrubbed from every result before it leaves the executor.
    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.handlers.contains_key(tool)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn wrap_result(&self, tool: &str, result: &Value, meta: ToolCallMeta) -> Value {
        let ToolCallMeta {
            started_at,
            trace_id,
            span_id,
        } = meta;
        let redacted = redact_object(result, MAX_RESULT_STRING, Some(self.secrets.as_slice()));
        let meta = serde_json::json!({
            "tool": tool,
            "trace_id": trace_id,
            "span_id": span_id,
            "duration_ms": chrono::Utc::now().timestamp_millis() - started_at,
        });
        serde_json::json!({
            "ok": true,
            "result": redacted,
            "meta": meta,
        })
    }

    pub async fn execute(&self, tool: &str, args: Value) -> Result<Value, ToolError> {
        let started_at = chrono::Utc::now().timestamp_millis();
        let Some(handler) = self.handlers.get(tool) else {
            return Err(unknown_tool_error(tool, &self.tool_names()));
        };
        let trace_id = uuid::Uuid::new_v4().to_string();
        let span_id = uuid::Uuid::new_v4().to_string();

        self.logger.debug(
            tool,
            Some(&serde_json::json!({ "trace_id": trace_id, "span_id": span_id })),
        );

        let result = match handler.handle(args).await {
            Ok(result) => result,
            Err(err) => {
                self.logger.warn(
                    "Tool call failed",
                    Some(&serde_json::json!({
                        "tool": tool,
                        "kind": err.kind,
                        "code": err.code,
                        "trace_id": trace_id,
                        "duration_ms": chrono::Utc::now().timestamp_millis() - started_at,
                    })),
                );
                return Err(err);
            }
        };

        Ok(self.wrap_result(
            tool,
            &result,
            ToolCallMeta {
                started_at,
                trace_id,
                span_id,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolErrorKind;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn handle(&self, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    fn executor() -> ToolExecutor {
        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        handlers.insert("echo".to_string(), Arc::new(Echo));
        ToolExecutor::new(Logger::new("test"), handlers)
            .with_secrets(vec!["s3cret-value".to_string()])
    }

    #[tokio::test]
    async fn results_carry_meta_and_are_scrubbed() {
        let payload = executor()
            .execute("echo", serde_json::json!({"note": "leaked s3cret-value", "token": "x"}))
            .await
            .expect("execute");
        assert_eq!(payload["ok"], Value::Bool(true));
        assert_eq!(payload["meta"]["tool"], "echo");
        let rendered = payload["result"].to_string();
        assert!(!rendered.contains("s3cret-value"));
        assert_ne!(payload["result"]["token"], "x");
    }

    #[tokio::test]
    async fn unknown_tool_suggests_registered_names() {
        let err = executor()
            .execute("echoo", Value::Null)
            .await
            .expect_err("must fail");
        assert_eq!(err.kind, ToolErrorKind::InvalidParams);
        assert_eq!(err.hint.as_deref(), Some("Did you mean: echo?"));
    }
}
