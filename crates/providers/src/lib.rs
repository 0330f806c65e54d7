pub mod openai;

use async_trait::async_trait;
use browser_agent_core::config::ProviderConfig;
use browser_agent_core::types::{ChatMessage, LLMResponse};
use browser_agent_core::{Error, Result};
use serde_json::Value;

/// A completion backend: ordered messages and tool schemas in, text or tool calls out.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;
}

pub use openai::OpenAIProvider;

pub fn create_provider(config: &ProviderConfig) -> Result<OpenAIProvider> {
    if config.api_key.trim().is_empty() {
        return Err(Error::Config(
            "no API key configured (set provider.apiKey, OPENAI_API_KEY or AZURE_OPENAI_API_KEY)"
                .to_string(),
        ));
    }
    Ok(OpenAIProvider::from_config(config))
}
