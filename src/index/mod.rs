//! Similarity index over embedded requirement/response pairs
//!
//! Append-only, in-process k-nearest-neighbour search. Scores are cosine
//! similarity clamped to [0, 1]; equal scores rank the newer record first.
//! Queries never fail on sparse data: an empty or mismatched index simply
//! yields no candidates.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::errors::{EmbeddingError, IndexError};
use crate::types::{EmbeddingRecord, RequirementId, ScoredRecord};

/// Default number of neighbours returned
pub const DEFAULT_TOP_K: usize = 5;

/// Search parameters for retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum number of results to retrieve
    pub top_k: usize,
    /// Minimum similarity (0.0 to 1.0)
    pub min_score: f32,
    /// Restrict to one category (None = all categories)
    pub category: Option<String>,
    /// Skip records that answered this requirement
    pub exclude_requirement: Option<RequirementId>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: 0.0,
            category: None,
            exclude_requirement: None,
        }
    }
}

impl SearchParams {
    pub fn with_top_k(top_k: usize) -> Self {
        Self {
            top_k,
            ..Default::default()
        }
    }
}

/// Shared, read-heavy vector index
#[derive(Debug, Default)]
pub struct SimilarityIndex {
    /// Fixed embedding dimension; set by the first insert when unconfigured
    dimension: RwLock<Option<usize>>,
    records: RwLock<Vec<Arc<EmbeddingRecord>>>,
}

impl SimilarityIndex {
    /// Create an empty index whose dimension is fixed by the first insert
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index for vectors of a known dimension
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: RwLock::new(Some(dimension)),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Build an index from previously persisted records
    pub fn from_records(
        records: impl IntoIterator<Item = EmbeddingRecord>,
    ) -> Result<Self, IndexError> {
        let index = Self::new();
        for record in records {
            index.insert(record)?;
        }
        Ok(index)
    }

    /// Append a record. Existing records are never replaced.
    pub fn insert(&self, record: EmbeddingRecord) -> Result<(), IndexError> {
        if record.vector.is_empty() || record.vector.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::InvalidVector);
        }

        {
            let mut dimension = self
                .dimension
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match *dimension {
                Some(expected) if expected != record.dimension() => {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: record.dimension(),
                    });
                }
                Some(_) => {}
                None => *dimension = Some(record.dimension()),
            }
        }

        debug!(
            record_id = %record.id,
            category = %record.category,
            "Appending embedding record"
        );
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(record));
        Ok(())
    }

    /// Rank stored records against `vector`
    pub fn query(&self, vector: &[f32], params: &SearchParams) -> Vec<ScoredRecord> {
        if params.top_k == 0 {
            return Vec::new();
        }

        if let Some(expected) = self.dimension() {
            if expected != vector.len() {
                warn!(
                    expected,
                    actual = vector.len(),
                    "Query vector dimension does not match index; returning no matches"
                );
                return Vec::new();
            }
        }

        // Score outside the lock so appends are never blocked by a scan
        let candidates: Vec<Arc<EmbeddingRecord>> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut hits: Vec<(Arc<EmbeddingRecord>, f32)> = candidates
            .into_iter()
            .filter(|r| Self::is_eligible(r, params))
            .filter_map(|r| {
                let score = cosine_similarity(vector, &r.vector)?;
                (score >= params.min_score).then_some((r, score))
            })
            .collect();

        hits.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(params.top_k);

        hits.into_iter()
            .map(|(record, score)| ScoredRecord {
                record: (*record).clone(),
                score,
            })
            .collect()
    }

    /// Embed `text` on the fly and query with the result
    pub async fn query_text(
        &self,
        embedder: &dyn Embedder,
        text: &str,
        params: &SearchParams,
    ) -> Result<Vec<ScoredRecord>, EmbeddingError> {
        let vector = embedder.embed(text).await?;
        Ok(self.query(&vector, params))
    }

    fn is_eligible(record: &EmbeddingRecord, params: &SearchParams) -> bool {
        if let Some(category) = &params.category {
            if !record.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        match (params.exclude_requirement, record.requirement_id) {
            (Some(excluded), Some(id)) => excluded != id,
            _ => true,
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        *self.dimension.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records written for one requirement
    pub fn count_for(&self, requirement_id: RequirementId) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.requirement_id == Some(requirement_id))
            .count()
    }

    /// Copy of every stored record, in insertion order
    pub fn snapshot(&self) -> Vec<EmbeddingRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| (**r).clone())
            .collect()
    }
}

/// Cosine similarity clamped to [0, 1]; `None` for degenerate vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x = f64::from(x);
        let y = f64::from(y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((dot / denom).clamp(0.0, 1.0) as f32)
}
