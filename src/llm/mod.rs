//! Model endpoint integration.
//!
//! The model is an untrusted, remote responder. Providers return the raw
//! assistant message; interpreting it is the tool-call parser's job.
//!
//! - `provider`: message types and the `LlmProvider` trait
//! - `openai_compat`: HTTP client for OpenAI-compatible chat completions
//! - `mock`: offline scripted model for dry runs and tests
//! - `settings`: layered endpoint settings

pub mod mock;
pub mod openai_compat;
pub mod provider;
pub mod settings;

pub use mock::MockProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use provider::*;
pub use settings::{LlmOverrides, LlmSettings};

use std::sync::Arc;

use crate::error::LlmError;

/// Create the HTTP provider from settings.
pub fn create_provider(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiCompatProvider::new(settings)?;
    tracing::info!(
        model = %settings.model,
        url = %provider.url(),
        api_key = %settings.masked_api_key(),
        "Using OpenAI-compatible endpoint"
    );
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_create_provider_constructs_without_network() {
        let settings = LlmSettings {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "GMV_API_KEY".to_string(),
            api_key: secrecy::SecretString::from("sk-test-key-123456"),
            timeout: Duration::from_secs(5),
            verify_tls: true,
        };
        let provider = create_provider(&settings).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o-mini");
    }
}
