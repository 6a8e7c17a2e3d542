//! Type definitions module
//!
//! Core data model shared by the index, aggregator, orchestrator and storage.

pub mod embedding;
pub mod provider;
pub mod requirement;
pub mod response;

// Re-export commonly used types
pub use embedding::{EmbeddingRecord, ScoredRecord};
pub use provider::{ProviderKind, ProviderMode};
pub use requirement::{Requirement, RequirementId};
pub use response::{
    AggregatedResponse, AnswerSource, Feedback, ProviderResponse, ResponseId, ResponseOutcome,
    SimilarMatch,
};
