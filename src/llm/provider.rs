//! Conversation types and the provider trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::LlmError;

/// Role of a transcript message. Also the role of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// One requested tool invocation, normalized from whatever shape the model used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the result with the request; unique within a turn.
    pub id: String,
    pub name: String,
    /// Decoded argument object, or the original string when it was not valid JSON.
    pub raw_arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, raw_arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments,
        }
    }

    /// OpenAI wire form, used when echoing the call back in the transcript.
    pub fn to_wire(&self) -> Value {
        let arguments = match &self.raw_arguments {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        json!({
            "id": self.id,
            "type": "function",
            "function": {"name": self.name, "arguments": arguments},
        })
    }
}

/// A message in the conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant message that requested tools.
    pub fn assistant_with_calls(content: impl Into<String>, calls: &[ToolCall]) -> Self {
        Self {
            tool_calls: calls.iter().map(ToolCall::to_wire).collect(),
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Tool result fed back to the model.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// Schema of one tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// OpenAI function-calling form.
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Request for a completion that may call tools.
#[derive(Debug, Clone)]
pub struct ToolCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
}

impl ToolCompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            temperature: 0.0,
        }
    }
}

/// Raw assistant message, exactly as the endpoint returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCompletionResponse {
    pub message: Value,
}

impl ToolCompletionResponse {
    pub fn new(message: Value) -> Self {
        Self { message }
    }

    /// Text content of the message, empty when absent or not a string.
    pub fn content(&self) -> String {
        self.message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

/// A model endpoint.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_serialization() {
        let msg = ChatMessage::tool_result("call_1", "gmv_validate", "ok");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_1");
        assert_eq!(v["name"], "gmv_validate");
        assert!(v.get("tool_calls").is_none());
    }

    #[test]
    fn test_assistant_with_calls_uses_wire_shape() {
        let call = ToolCall::new("c1", "slurm_squeue", json!({"limit": 5}));
        let msg = ChatMessage::assistant_with_calls("", &[call]);
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0]["function"]["name"], "slurm_squeue");
        let args: Value =
            serde_json::from_str(msg.tool_calls[0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["limit"], 5);
    }

    #[test]
    fn test_response_content_tolerates_null() {
        let resp = ToolCompletionResponse::new(json!({"role": "assistant", "content": null}));
        assert_eq!(resp.content(), "");
    }
}
