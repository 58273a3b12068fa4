//! Wire types for the OpenAI-compatible chat-completions surface.
//!
//! Requests are untyped JSON on the wire. The typed envelope below names only
//! the fields the proxy inspects; everything else lands in the flattened
//! `extra` map and round-trips to the provider unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An incoming chat-completions request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Unrecognized fields, forwarded verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    /// String, content-part array, or absent (tool-call messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Concatenated text of this message: plain strings plus `text` parts.
    pub fn text(&self) -> String {
        match &self.content {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(|part| {
                    if part.get("type").and_then(|t| t.as_str()) == Some("text") {
                        part.get("text").and_then(|t| t.as_str())
                    } else {
                        part.as_str()
                    }
                })
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        }
    }

    /// Whether the content carries image parts.
    pub fn has_image(&self) -> bool {
        match &self.content {
            Some(Value::Array(parts)) => parts.iter().any(|part| {
                matches!(
                    part.get("type").and_then(|t| t.as_str()),
                    Some("image_url") | Some("image")
                )
            }),
            _ => false,
        }
    }
}

impl ChatRequest {
    /// Whether streaming was requested.
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// The trimmed text of the last user-role message, if any.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.text().trim().to_string())
    }

    /// Whether the request declares any tools.
    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
    }

    /// Whether `tool_choice` is present and not the literal `"none"`.
    pub fn tool_choice_active(&self) -> bool {
        match &self.tool_choice {
            None | Some(Value::Null) => false,
            Some(Value::String(choice)) => choice != "none",
            Some(_) => true,
        }
    }

    /// Names of the declared tools, for tool-call validation.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .flatten()
            .filter_map(|tool| {
                tool.get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
            })
            .collect()
    }

    /// Whether any message carries multimodal image content.
    pub fn has_image_content(&self) -> bool {
        self.messages.iter().any(|m| m.has_image())
    }

    /// Serialize for dispatch with the `model` field replaced.
    pub fn to_provider_body(&self, bare_model: &str) -> Value {
        let mut body = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), Value::String(bare_model.to_string()));
        }
        body
    }
}
