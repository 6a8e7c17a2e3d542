//! Persistence collaborator
//!
//! The pipeline never touches a database directly; it talks to a
//! `ResponseStore`. `MemoryStore` is the bundled implementation and can
//! round-trip its contents through a JSON workspace file.

pub mod memory;

pub use memory::{MemoryStore, Workspace};

use async_trait::async_trait;

use crate::errors::PersistenceError;
use crate::types::{
    AggregatedResponse, EmbeddingRecord, Feedback, Requirement, RequirementId, ResponseId,
    ScoredRecord,
};

pub type StoreResult<T> = std::result::Result<T, PersistenceError>;

/// Storage operations consumed by the pipeline and the service facade
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Requirements of one batch, in submission order
    async fn load_requirements(&self, batch_id: &str) -> StoreResult<Vec<Requirement>>;

    async fn load_requirement(&self, id: RequirementId) -> StoreResult<Requirement>;

    async fn save_aggregated_response(&self, response: &AggregatedResponse) -> StoreResult<()>;

    /// Stored responses for one requirement, newest first
    async fn load_responses(
        &self,
        requirement_id: RequirementId,
    ) -> StoreResult<Vec<AggregatedResponse>>;

    /// Append an embedding record; existing records are never overwritten
    async fn save_embedding(&self, record: &EmbeddingRecord) -> StoreResult<()>;

    /// Ranked nearest neighbours, optionally restricted to one category
    async fn query_embeddings(
        &self,
        vector: &[f32],
        category: Option<&str>,
        k: usize,
    ) -> StoreResult<Vec<ScoredRecord>>;

    /// Every stored embedding record, used to warm the in-process index
    async fn load_embeddings(&self) -> StoreResult<Vec<EmbeddingRecord>>;

    /// Attach reviewer metadata and return the updated response
    async fn attach_feedback(
        &self,
        response_id: ResponseId,
        rating: Option<i32>,
        feedback: Option<Feedback>,
    ) -> StoreResult<AggregatedResponse>;
}
