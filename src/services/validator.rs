//! Non-streaming response validation.
//!
//! Pure checks over a parsed upstream body. The executor feeds the verdict
//! into its retry decision; an invalid response with tool calls is still
//! returned verbatim (tool side-effects must never be duplicated by a retry).

use crate::api::models::ChatRequest;
use crate::core::catalog::Tier;
use serde_json::Value;

/// Content this short from a non-heartbeat tier usually means a cheap model
/// stalled rather than answered.
const SUSPICIOUS_CONTENT_MAX: usize = 14;

/// Verdict on one upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub reason: String,
    pub had_tool_calls: bool,
}

impl Validation {
    fn ok(had_tool_calls: bool) -> Self {
        Self {
            valid: true,
            reason: "ok".to_string(),
            had_tool_calls,
        }
    }

    fn invalid(reason: impl Into<String>, had_tool_calls: bool) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
            had_tool_calls,
        }
    }
}

/// Validate an upstream chat-completions response.
pub fn validate(status: u16, body: &Value, request: &ChatRequest, tier: Tier) -> Validation {
    if !(200..300).contains(&status) {
        return Validation::invalid(format!("http_error_{}", status), false);
    }

    if !body.is_object() {
        return Validation::invalid("invalid_json_body", false);
    }

    if body.get("error").is_some() {
        return Validation::invalid("api_error_response", false);
    }

    let choices = match body.get("choices").and_then(|c| c.as_array()) {
        Some(choices) => choices,
        None => return Validation::invalid("missing_choices", false),
    };
    let first = match choices.first() {
        Some(first) => first,
        None => return Validation::invalid("missing_first_choice", false),
    };
    let message = match first.get("message") {
        Some(message) if message.is_object() => message,
        _ => return Validation::invalid("missing_message", false),
    };

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .filter(|t| !t.is_empty());

    if let Some(tool_calls) = tool_calls {
        if request.has_tools() {
            let declared = request.tool_names();
            for tool_call in tool_calls {
                let name = tool_call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("");
                if !declared.contains(&name) {
                    return Validation::invalid(format!("unknown_tool_name:{}", name), true);
                }
                let arguments = tool_call
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|a| a.as_str())
                    .unwrap_or("");
                if !arguments.is_empty()
                    && arguments != "{}"
                    && serde_json::from_str::<Value>(arguments).is_err()
                {
                    return Validation::invalid("invalid_tool_call_json", true);
                }
            }
        }
        return Validation::ok(true);
    }

    if tier != Tier::Heartbeat {
        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .trim();
        if (1..=SUSPICIOUS_CONTENT_MAX).contains(&content.len()) {
            return Validation::invalid("suspiciously_short_response", false);
        }
    }

    Validation::ok(false)
}
