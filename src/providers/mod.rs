//! Provider client adapters
//!
//! Every model provider sits behind `ProviderClient`: prompt in, text or a
//! closed `ProviderError` out. Callers route by `ProviderKind` only and
//! never branch on the concrete adapter.

pub mod anthropic;
pub mod openai;
pub mod prompt;
pub mod registry;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiCompatibleClient;
pub use prompt::{ChatMessage, Prompt, PromptBuilder, Role};
pub use registry::ProviderRegistry;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::{Duration, Instant};

use crate::errors::ProviderError;
use crate::types::{ProviderKind, ProviderResponse};

/// Uniform capability over one external model provider
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// Submit `prompt` and return the generated text.
    ///
    /// Implementations should finish within `timeout`; `call_with_timeout`
    /// enforces it regardless.
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> Result<String, ProviderError>;
}

/// Invoke `client` with an independently enforced deadline
pub async fn call_with_timeout(
    client: &dyn ProviderClient,
    prompt: &Prompt,
    timeout: Duration,
) -> ProviderResponse {
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, client.generate(prompt, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            duration_ms: timeout.as_millis() as u64,
        }),
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(text) => ProviderResponse::success(client.kind(), text, latency_ms),
        Err(error) => ProviderResponse::failure(client.kind(), error, latency_ms),
    }
}

/// Map a non-success HTTP status onto the closed error set
pub(crate) fn error_for_status(status: StatusCode, body: &str, timeout: Duration) -> ProviderError {
    let detail = format!("HTTP {}: {}", status, truncate(body, 200));
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout {
            duration_ms: timeout.as_millis() as u64,
        },
        s if s.is_server_error() => ProviderError::Unavailable(detail),
        _ => ProviderError::InvalidResponse(detail),
    }
}

/// Map a transport failure onto the closed error set
pub(crate) fn error_for_transport(err: &reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            duration_ms: timeout.as_millis() as u64,
        }
    } else if err.is_decode() || err.is_body() {
        ProviderError::InvalidResponse(err.to_string())
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}

/// Trim generated text; empty output is invalid
pub(crate) fn normalize_text(text: &str) -> Result<String, ProviderError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::InvalidResponse(
            "provider returned empty text".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockProvider;

    #[test]
    fn test_status_mapping() {
        let t = Duration::from_secs(5);
        assert!(matches!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, "slow down", t),
            ProviderError::RateLimited(_)
        ));
        assert_eq!(
            error_for_status(StatusCode::GATEWAY_TIMEOUT, "", t),
            ProviderError::Timeout { duration_ms: 5000 }
        );
        assert!(matches!(
            error_for_status(StatusCode::BAD_GATEWAY, "", t),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::BAD_REQUEST, "bad", t),
            ProviderError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  answer \n").unwrap(), "answer");
        assert!(matches!(
            normalize_text(" \n\t "),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[tokio::test]
    async fn test_call_with_timeout_success() {
        let provider = MockProvider::answering(ProviderKind::OpenAi, "Yes, we support SSO.");
        let prompt = Prompt::new("system").with_user("Do you support SSO?");
        let response = call_with_timeout(&provider, &prompt, Duration::from_secs(1)).await;
        assert_eq!(response.provider, ProviderKind::OpenAi);
        assert_eq!(response.text(), Some("Yes, we support SSO."));
    }

    #[tokio::test]
    async fn test_call_with_timeout_elapsed() {
        let provider = MockProvider::answering(ProviderKind::DeepSeek, "late")
            .with_delay(Duration::from_millis(200));
        let prompt = Prompt::new("system");
        let response = call_with_timeout(&provider, &prompt, Duration::from_millis(20)).await;
        assert_eq!(
            response.outcome,
            Err(ProviderError::Timeout { duration_ms: 20 })
        );
    }
}
