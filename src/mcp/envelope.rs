use crate::utils::redact::redact_object;
use serde_json::Value;

const MAX_ENVELOPE_STRING: usize = 20 * 1024;

/// Shapes an executor payload (`{ok, result, meta}`) into the text block
/// returned from `tools/call`.
pub fn build_generic_envelope(
    tool_name: &str,
    tool_result: &Value,
    meta: Option<&Value>,
    extra_secrets: Option<&[String]>,
) -> Value {
    let success = tool_result
        .get("success")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let duration_ms = meta
        .and_then(|m| m.get("duration_ms").and_then(|v| v.as_i64()))
        .unwrap_or(0);
    let trace = serde_json::json!({
        "trace_id": meta.and_then(|m| m.get("trace_id")).cloned().unwrap_or(Value::Null),
        "span_id": meta.and_then(|m| m.get("span_id")).cloned().unwrap_or(Value::Null),
    });
    serde_json::json!({
        "success": success,
        "tool": tool_name,
        "result": redact_object(tool_result, MAX_ENVELOPE_STRING, extra_secrets),
        "duration_ms": duration_ms,
        "trace": trace,
    })
}
