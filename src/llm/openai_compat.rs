//! OpenAI-compatible chat completions client.
//!
//! Talks to any endpoint that speaks `POST {base}/chat/completions` with
//! bearer auth. The assistant message is returned untouched so the parser
//! can deal with every response shape the endpoint might produce.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::error::LlmError;
use crate::llm::provider::{LlmProvider, ToolCompletionRequest, ToolCompletionResponse};
use crate::llm::settings::LlmSettings;

/// Maximum number of characters of an error body kept in `LlmError::Http`.
const MAX_ERROR_BODY_CHARS: usize = 2000;

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: SecretString,
    timeout: std::time::Duration,
}

impl OpenAiCompatProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        let url = build_chat_url(&settings.base_url);
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            url,
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            timeout: settings.timeout,
        })
    }

    /// Fully resolved chat completions URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload(&self, request: &ToolCompletionRequest) -> Result<Value, LlmError> {
        let messages = serde_json::to_value(&request.messages)?;
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if !request.tools.is_empty() {
            payload["tools"] = Value::Array(request.tools.iter().map(|t| t.to_openai()).collect());
            payload["tool_choice"] = json!("auto");
        }
        Ok(payload)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let payload = self.payload(&request)?;
        tracing::debug!(
            url = %self.url,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat completion request"
        );

        let mut builder = self.client.post(&self.url).json(&payload);
        let key = self.api_key.expose_secret();
        if !key.is_empty() {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    url: self.url.clone(),
                    timeout: self.timeout,
                }
            } else {
                LlmError::RequestFailed {
                    url: self.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    url: self.url.clone(),
                    timeout: self.timeout,
                }
            } else {
                LlmError::RequestFailed {
                    url: self.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Chat completion request failed");
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let data: Value = serde_json::from_str(&body).map_err(|e| LlmError::InvalidResponse {
            reason: format!("response is not JSON: {e}"),
        })?;
        extract_message(data).map(ToolCompletionResponse::new)
    }
}

/// Resolve the chat completions endpoint from a base URL.
///
/// Accepts a bare host, a `/v1` base, or the full endpoint.
pub fn build_chat_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

/// Pull `choices[0].message` out of a completion body.
fn extract_message(data: Value) -> Result<Value, LlmError> {
    let Value::Object(mut obj) = data else {
        return Err(LlmError::InvalidResponse {
            reason: "response is not a JSON object".to_string(),
        });
    };
    let message = match obj.remove("choices") {
        Some(Value::Array(mut choices)) if !choices.is_empty() => {
            match choices.swap_remove(0) {
                Value::Object(mut choice) => choice.remove("message"),
                _ => None,
            }
        }
        _ => None,
    };
    match message {
        Some(msg @ Value::Object(_)) => Ok(msg),
        _ => Ok(json!({"role": "assistant", "content": ""})),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
