//! Offline mock model.
//!
//! Answers a "validate" request with a single `gmv_validate` call and then
//! closes the turn once the tool result comes back. Anything else gets a
//! plain reply. Used by `GMV_CHAT_MOCK=1` and by tests.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::LlmError;
use crate::llm::provider::{
    LlmProvider, Role, ToolCall, ToolCompletionRequest, ToolCompletionResponse,
};

pub struct MockProvider {
    config_path: String,
}

impl MockProvider {
    pub fn new(config_path: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let Some(last) = request.messages.last() else {
            return Ok(reply("Nothing to do (mock)."));
        };

        if last.role == Role::Tool {
            return Ok(reply("done (mock)"));
        }

        if last.role == Role::User && last.content.to_lowercase().contains("validate") {
            let call = ToolCall::new(
                "mock_call_1",
                "gmv_validate",
                json!({"config_path": self.config_path, "strict": false}),
            );
            return Ok(ToolCompletionResponse::new(json!({
                "role": "assistant",
                "content": "OK, validating the config first.",
                "tool_calls": [call.to_wire()],
            })));
        }

        Ok(reply("The mock model only handles the validate example."))
    }
}

fn reply(content: &str) -> ToolCompletionResponse {
    ToolCompletionResponse::new(json!({
        "role": "assistant",
        "content": Value::String(content.to_string()),
    }))
}
