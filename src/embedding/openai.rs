//! OpenAI embeddings endpoint client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{check_dimension, Embedder};
use crate::errors::{EmbeddingError, Result, RfpError};

/// Default embeddings model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Dimension of `text-embedding-3-small`
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Embeddings over `POST {base}/embeddings`
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: String, dimension: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(RfpError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            dimension,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::Request(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Malformed("no embedding in response".to_string()))?;

        debug!(model = %self.model, dimension = vector.len(), "Embedded text");
        check_dimension(vector, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_creation() {
        let embedder = OpenAiEmbedder::new(
            "https://api.openai.com/v1/",
            DEFAULT_EMBEDDING_MODEL,
            "sk-test".to_string(),
            DEFAULT_EMBEDDING_DIMENSION,
        )
        .unwrap();
        assert_eq!(embedder.base_url(), "https://api.openai.com/v1");
        assert_eq!(embedder.model(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(embedder.dimension(), DEFAULT_EMBEDDING_DIMENSION);
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}]}"#;
        let body: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.data[0].embedding, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let embedder = OpenAiEmbedder::new(
            "http://127.0.0.1:9",
            DEFAULT_EMBEDDING_MODEL,
            "sk-test".to_string(),
            4,
        )
        .unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Request(_)));
    }
}
