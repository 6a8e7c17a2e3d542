//! Error types for rfpbuddy
//!
//! Each layer of the pipeline has its own error enum so that callers can
//! tell a recoverable provider hiccup from a batch that never started.
//! `RfpError` is the umbrella type returned by the service facade.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RequirementId, ResponseId};

/// Failure of a single provider call. Never fatal to a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("Provider call timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Provider rate limited the request: {0}")]
    RateLimited(String),

    #[error("Provider returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Unavailable(_)
        )
    }

    /// Short label used in logs and telemetry
    pub fn label(&self) -> &'static str {
        match self {
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Unavailable(_) => "unavailable",
        }
    }
}

/// Outcome markers recorded on an `AggregatedResponse`
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationError {
    /// No provider produced usable text; nothing was synthesized
    #[error("All {attempted} provider(s) failed")]
    AllProvidersFailed { attempted: usize },

    /// Synthesis failed and an individual provider answer was used instead
    #[error("Synthesis failed ({reason}); fell back to {fallback}")]
    SynthesisFailed { fallback: String, reason: String },
}

/// Errors surfaced to the caller of `start`; the batch never begins
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("A batch is already running for scope '{scope}'")]
    AlreadyRunning { scope: String },

    #[error("Invalid concurrency limit {requested}: must be between 1 and {max}")]
    InvalidConcurrencyLimit { requested: usize, max: usize },

    #[error("No providers are configured for mode '{mode}'")]
    NoProviders { mode: String },

    #[error("Invalid batch state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },
}

/// Errors reported by the storage collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Requirement {0} not found")]
    RequirementNotFound(RequirementId),

    #[error("Response {0} not found")]
    ResponseNotFound(ResponseId),

    #[error("No response recorded for requirement {0}")]
    NoResponse(RequirementId),

    #[error("Batch '{0}' not found")]
    BatchNotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors from the embedding collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Embedding has dimension {actual}, expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("Embedding response was malformed: {0}")]
    Malformed(String),
}

/// Errors from the similarity index
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("Vector has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector is empty or contains non-finite values")]
    InvalidVector,
}

/// Main error type for rfpbuddy
#[derive(Error, Debug)]
pub enum RfpError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{0}")]
    Generic(String),
}

/// Result type alias for rfpbuddy operations
pub type Result<T> = std::result::Result<T, RfpError>;

impl From<anyhow::Error> for RfpError {
    fn from(err: anyhow::Error) -> Self {
        RfpError::Generic(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Timeout { duration_ms: 3000 };
        assert!(err.to_string().contains("3000"));
        assert_eq!(err.label(), "timeout");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::RateLimited("slow down".into()).is_retryable());
        assert!(ProviderError::Unavailable("connection reset".into()).is_retryable());
        assert!(!ProviderError::Timeout { duration_ms: 10 }.is_retryable());
        assert!(!ProviderError::InvalidResponse("empty".into()).is_retryable());
    }

    #[test]
    fn test_orchestration_error_display() {
        let err = OrchestrationError::InvalidConcurrencyLimit {
            requested: 0,
            max: 16,
        };
        assert!(err.to_string().contains("between 1 and 16"));
    }

    #[test]
    fn test_rfp_error_from_persistence() {
        let err: RfpError = PersistenceError::RequirementNotFound(RequirementId(7)).into();
        assert!(matches!(err, RfpError::Persistence(_)));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_aggregation_error_serialization() {
        let err = AggregationError::AllProvidersFailed { attempted: 3 };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("all_providers_failed"));
        let back: AggregationError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
