//! Embedded requirement/response pairs used for retrieval

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::types::requirement::RequirementId;
use crate::types::response::SimilarMatch;

/// Vector plus denormalized metadata for similarity search
///
/// Written once by the pipeline (or imported from history) and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: Uuid,

    /// Requirement this pair answered, when it came from this system
    #[serde(default)]
    pub requirement_id: Option<RequirementId>,

    pub category: String,
    pub requirement: String,
    pub response: String,
    pub vector: Vec<f32>,

    /// Free-form metadata (response id, provider mode, source file, ...)
    #[serde(default)]
    pub payload: Map<String, JsonValue>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(
        category: impl Into<String>,
        requirement: impl Into<String>,
        response: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requirement_id: None,
            category: category.into(),
            requirement: requirement.into(),
            response: response.into(),
            vector,
            payload: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn for_requirement(mut self, id: RequirementId) -> Self {
        self.requirement_id = Some(id);
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Convert into the reference stored on an aggregated response
    pub fn to_match(&self, score: f32, rank: usize) -> SimilarMatch {
        SimilarMatch {
            record_id: self.id,
            requirement: self.requirement.clone(),
            response: self.response.clone(),
            category: self.category.clone(),
            score,
            reference: format!("Response #{}", rank),
        }
    }
}

/// A record returned by a similarity query, with its score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: EmbeddingRecord,
    pub score: f32,
}
