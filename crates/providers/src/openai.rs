use async_trait::async_trait;
use browser_agent_core::config::ProviderConfig;
use browser_agent_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use browser_agent_core::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::Provider;

/// Find the largest byte index <= `max_bytes` that is a valid char boundary.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Chat-completions client for OpenAI-compatible endpoints and Azure OpenAI deployments.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    /// Azure deployments route by `api-version` and authenticate with `api-key`.
    api_version: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, model: &str, max_tokens: u32, temperature: f32) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: api_key.to_string(),
            api_base: api_base
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            api_version: None,
            model: model.to_string(),
            max_tokens,
            temperature,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        let mut provider = Self::new(
            &config.api_key,
            config.api_base.as_deref(),
            &config.model,
            config.max_tokens,
            config.temperature,
        );
        provider.api_version = config.api_version.clone();
        provider
    }

    fn endpoint(&self) -> String {
        match &self.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.api_base, self.model, version
            ),
            None => format!("{}/chat/completions", self.api_base),
        }
    }

    fn build_request(&self, messages: &[ChatMessage], tools: &[Value]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            tool_choice: if tools.is_empty() { None } else { Some("auto".to_string()) },
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    fn parse_response(raw_body: &str) -> Result<LLMResponse> {
        let chat_response: ChatResponse = serde_json::from_str(raw_body).map_err(|e| {
            let end = truncate_at_char_boundary(raw_body, 500);
            Error::Provider(format!("Failed to parse response: {}. Body: {}", e, &raw_body[..end]))
        })?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("No choices in response".to_string()))?;

        let content = choice.message.content.filter(|c| !c.is_empty());
        Ok(LLMResponse {
            content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: chat_response.usage.unwrap_or(Value::Null),
        })
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse> {
        let url = self.endpoint();
        let request = self.build_request(messages, tools);
        info!(model = %self.model, tools_count = tools.len(), messages_count = messages.len(), "Calling LLM");

        let mut builder = self.client.post(&url).json(&request);
        builder = match self.api_version {
            Some(_) => builder.header("api-key", &self.api_key),
            None => builder.header("Authorization", format!("Bearer {}", self.api_key)),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = %status, body = %raw_body, "LLM API error");
            return Err(Error::Provider(format!("API error {}: {}", status, raw_body)));
        }
        debug!(body_len = raw_body.len(), "LLM response received");

        Self::parse_response(&raw_body)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallRequest>>,
}
