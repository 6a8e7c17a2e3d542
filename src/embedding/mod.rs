//! Embedding collaborator
//!
//! Turns requirement text into fixed-dimension vectors for the similarity
//! index. Two backends:
//! - `OpenAiEmbedder`: remote embeddings endpoint over reqwest
//! - `HashingEmbedder`: offline feature hashing, deterministic per input

pub mod hashing;
pub mod openai;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::errors::{EmbeddingError, Result, RfpError};

/// Text to vector capability
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;

    /// Dimension of every vector this embedder produces
    fn dimension(&self) -> usize;
}

/// Build the configured embedding backend
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        EmbeddingBackend::OpenAi => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                RfpError::Config(format!(
                    "Embedding backend 'openai' needs {} to be set",
                    config.api_key_env
                ))
            })?;
            let embedder = OpenAiEmbedder::new(
                &config.base_url,
                &config.model,
                api_key,
                config.dimension,
            )?;
            Ok(Arc::new(embedder))
        }
    }
}

/// Reject vectors that do not match the advertised dimension
pub(crate) fn check_dimension(
    vector: Vec<f32>,
    expected: usize,
) -> std::result::Result<Vec<f32>, EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::Dimension {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(vec![0.0; 4], 4).is_ok());
        assert_eq!(
            check_dimension(vec![0.0; 3], 4).unwrap_err(),
            EmbeddingError::Dimension {
                expected: 4,
                actual: 3
            }
        );
    }

    #[tokio::test]
    async fn test_from_config_hashing() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::Hashing,
            dimension: 64,
            ..Default::default()
        };
        let embedder = from_config(&config).unwrap();
        assert_eq!(embedder.dimension(), 64);
        assert_eq!(embedder.embed("hello").await.unwrap().len(), 64);
    }

    #[test]
    fn test_from_config_openai_requires_key() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::OpenAi,
            api_key_env: "RFPBUDDY_TEST_MISSING_EMBEDDING_KEY".to_string(),
            ..Default::default()
        };
        assert!(matches!(from_config(&config), Err(RfpError::Config(_))));
    }
}
