use crate::errors::ToolError;
use crate::services::api_client::{ApiClient, ApiRequest};
use crate::services::logger::Logger;
use crate::services::tool_executor::ToolHandler;
use crate::utils::suggest::suggest;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const BACKEND_TOOLS: &[&str] = &["health_check", "api_request", "capabilities", "config_status"];

#[derive(Clone)]
pub struct BackendManager {
    logger: Logger,
    client: Arc<ApiClient>,
    config_file: Option<PathBuf>,
}

impl BackendManager {
    pub fn new(logger: Logger, client: Arc<ApiClient>, config_file: Option<PathBuf>) -> Self {
        Self {
            logger: logger.child("backend"),
            client,
            config_file,
        }
    }

    pub async fn handle_action(&self, tool: &str, args: Value) -> Result<Value, ToolError> {
        match tool {
            "health_check" => self.health_check().await,
            "api_request" => self.api_request(&args).await,
            "capabilities" => self.capabilities(&args).await,
            "config_status" => self.config_status().await,
            other => Err(crate::utils::tool_errors::unknown_tool_error(other, BACKEND_TOOLS)),
        }
    }

    async fn health_check(&self) -> Result<Value, ToolError> {
        let status = self.client.health_check().await;
        let mut value = serde_json::to_value(&status)
            .map_err(|err| ToolError::internal(format!("Failed to encode health status: {}", err)))?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "success".to_string(),
                Value::Bool(status.reachable && status.authenticated),
            );
        }
        Ok(value)
    }

    async fn api_request(&self, args: &Value) -> Result<Value, ToolError> {
        let request = parse_api_request(args)?;
        self.logger.debug(
            "api_request",
            Some(&json!({ "method": request.method.as_str(), "path": request.path })),
        );
        let response = self.client.execute(request).await?;
        serde_json::to_value(&response)
            .map_err(|err| ToolError::internal(format!("Failed to encode response: {}", err)))
    }

    async fn capabilities(&self, args: &Value) -> Result<Value, ToolError> {
        let capabilities = self.client.capabilities().await;
        if let Some(family) = args.get("family").and_then(Value::as_str) {
            let Some(entry) = capabilities.families.get(family) else {
                let names: Vec<&str> = capabilities.families.keys().map(String::as_str).collect();
                let suggestions = suggest(family, &names, 3);
                let mut err =
                    ToolError::invalid_params(format!("Unknown endpoint family: {}", family));
                if !suggestions.is_empty() {
                    err = err.with_hint(format!("Did you mean: {}?", suggestions.join(", ")));
                }
                return Err(err);
            };
            let (path, version) = capabilities
                .resolve_api(family)
                .unwrap_or_else(|| (entry.path.clone(), entry.max_version));
            return Ok(json!({
                "success": true,
                "family": family,
                "path": path,
                "version": version,
                "min_version": entry.min_version,
                "scheme": entry.scheme,
                "source": capabilities.source,
            }));
        }
        Ok(json!({
            "success": true,
            "product": self.client.product(),
            "capabilities": capabilities.describe(),
            "schemes": self.client.schemes().describe(),
        }))
    }

    async fn config_status(&self) -> Result<Value, ToolError> {
        let session = self.client.sessions().get().await;
        Ok(json!({
            "success": true,
            "credential": self.client.credential().describe(),
            "config_file": self.config_file.as_ref().map(|p| p.display().to_string()),
            "session": {
                "active": session.is_some(),
                "expires_at": session.as_ref().and_then(|s| s.expires_at).map(|t| t.to_rfc3339()),
                "logins": self.client.sessions().logins(),
            },
        }))
    }
}

fn parse_api_request(args: &Value) -> Result<ApiRequest, ToolError> {
    let path = args
        .get("path")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ToolError::invalid_params("path is required"))?;
    if path.contains("://") || path.starts_with("//") {
        return Err(ToolError::invalid_params(
            "path must be relative to the backend base URL",
        ));
    }
    if path
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .split('/')
        .any(|segment| segment == "..")
    {
        return Err(ToolError::invalid_params("path must not contain '..' segments"));
    }

    let method = args
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_uppercase();
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| ToolError::invalid_params(format!("Unsupported method: {}", method)))?;

    let mut request = ApiRequest::new(method, path);
    for (key, value) in scalar_pairs(args.get("query"), "query")? {
        request = request.with_query(key, value);
    }

    match (args.get("body"), args.get("form")) {
        (Some(_), Some(_)) => {
            return Err(ToolError::invalid_params("body and form are mutually exclusive"));
        }
        (Some(body), None) if !body.is_null() => {
            request = request.with_json(body.clone());
        }
        (_, Some(form)) => {
            request = request.with_form(scalar_pairs(Some(form), "form")?);
        }
        _ => {}
    }

    if let Some(timeout_ms) = args.get("timeout_ms") {
        let timeout_ms = timeout_ms
            .as_u64()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| ToolError::invalid_params("timeout_ms must be a positive integer"))?;
        request = request.with_timeout(Duration::from_millis(timeout_ms));
    }
    Ok(request)
}

fn scalar_pairs(value: Option<&Value>, field: &str) -> Result<Vec<(String, String)>, ToolError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let map: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| ToolError::invalid_params(format!("{} must be an object", field)))?;
    map.iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(ToolError::invalid_params(format!(
                        "{}.{} must be a string, number or boolean",
                        field, key
                    )))
                }
            };
            Ok((key.clone(), text))
        })
        .collect()
}

/// Exposes one backend tool through the executor.
pub struct BackendTool {
    manager: Arc<BackendManager>,
    tool: &'static str,
}

impl BackendTool {
    pub fn new(manager: Arc<BackendManager>, tool: &'static str) -> Self {
        Self { manager, tool }
    }
}

#[async_trait]
impl ToolHandler for BackendTool {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.manager.handle_action(self.tool, args).await
    }
}
