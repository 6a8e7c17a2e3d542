//! OpenAI-compatible chat completions client
//!
//! Serves OpenAI and DeepSeek, which share the wire format:
//! - Endpoint: POST {base}/chat/completions
//! - Auth: bearer token
//! - System prompt travels as the first message

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

/// Chat completions client
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    kind: ProviderKind,
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleClient {
    /// Create a client for `kind` (OpenAI or DeepSeek)
    pub fn new(
        kind: ProviderKind,
        base_url: &str,
        model: &str,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder().build().map_err(RfpError::Http)?;

        Ok(Self {
            kind,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.into(),
            temperature: 0.2,
            max_tokens: None,
        })
    }

    /// Create a client from a provider config section
    pub fn from_config(kind: ProviderKind, config: &ProviderConfig, api_key: String) -> Result<Self> {
        let mut client = Self::new(kind, &config.base_url, &config.model, api_key)?;
        client.temperature = config.temperature;
        client.max_tokens = Some(config.max_tokens);
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, prompt: &Prompt) -> ChatRequest {
        let mut messages = Vec::with_capacity(prompt.messages.len() + 1);
        if !prompt.system.is_empty() {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: prompt.system.clone(),
            });
        }
        messages.extend(prompt.messages.iter().map(|m| WireMessage {
            role: match m.role {
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: m.content.clone(),
        }));

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> std::result::Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self.build_request(prompt);

        debug!(provider = %self.kind, model = %self.model, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        extract_text(body)
    }
}

fn extract_text(body: ChatResponse) -> std::result::Result<String, ProviderError> {
    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError::InvalidResponse("response had no choices".to_string()))?;
    normalize_text(&content)
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
