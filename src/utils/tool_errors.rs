use crate::errors::ToolError;
use crate::utils::suggest::suggest;

pub fn unknown_tool_error(tool: &str, known_tools: &[&str]) -> ToolError {
    let suggestions = suggest(tool, known_tools, 3);
    let hint = if suggestions.is_empty() {
        format!("Use one of: {}.", known_tools.join(", "))
    } else {
        format!("Did you mean: {}?", suggestions.join(", "))
    };
    ToolError::invalid_params(format!("Unknown tool: {}", tool))
        .with_hint(hint)
        .with_details(serde_json::json!({
            "known_tools": known_tools,
            "did_you_mean": suggestions,
        }))
}

#[cfg(test)]
mod tests {
    use super::unknown_tool_error;
    use crate::errors::ToolErrorKind;

    #[test]
    fn unknown_tool_error_points_at_nearest_tool() {
        let err = unknown_tool_error("helth_check", &["health_check", "api_request"]);
        assert_eq!(err.kind, ToolErrorKind::InvalidParams);
        assert_eq!(err.hint.as_deref(), Some("Did you mean: health_check?"));
    }
}
