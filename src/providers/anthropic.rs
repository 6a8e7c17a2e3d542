//! Anthropic messages API client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::prompt::{Prompt, Role};
use super::{error_for_status, error_for_transport, normalize_text, ProviderClient};
use crate::config::ProviderConfig;
use crate::errors::{ProviderError, Result, RfpError};
use crate::types::ProviderKind;

/// API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Messages API client (`POST {base}/messages`)
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(base_url: &str, model: &str, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder().build().map_err(RfpError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.into(),
            temperature: 0.2,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn from_config(config: &ProviderConfig, api_key: String) -> Result<Self> {
        let mut client = Self::new(&config.base_url, &config.model, api_key)?;
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, prompt: &Prompt) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: (!prompt.system.is_empty()).then(|| prompt.system.clone()),
            messages: prompt
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: m.content.clone(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> std::result::Result<String, ProviderError> {
        let url = format!("{}/messages", self.base_url);
        let request = self.build_request(prompt);

        debug!(provider = "anthropic", model = %self.model, "Sending messages request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| error_for_transport(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(error_for_status(status, &error_text, timeout));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        extract_text(body)
    }
}

/// Concatenate the text blocks of a response
fn extract_text(body: MessagesResponse) -> std::result::Result<String, ProviderError> {
    let text: String = body
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    normalize_text(&text)
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}
