//! In-memory `ResponseStore` with JSON workspace persistence

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ResponseStore, StoreResult};
use crate::errors::{PersistenceError, Result, RfpError};
use crate::index::{SearchParams, SimilarityIndex};
use crate::types::{
    AggregatedResponse, EmbeddingRecord, Feedback, Requirement, RequirementId, ResponseId,
    ScoredRecord,
};

/// Serialized form of a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Requirements keyed by batch id, in submission order
    #[serde(default)]
    pub batches: BTreeMap<String, Vec<Requirement>>,
    #[serde(default)]
    pub responses: Vec<AggregatedResponse>,
    #[serde(default)]
    pub embeddings: Vec<EmbeddingRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    batches: BTreeMap<String, Vec<RequirementId>>,
    requirements: BTreeMap<RequirementId, Requirement>,
    /// Insertion order is preserved so exports read chronologically
    responses: Vec<AggregatedResponse>,
}

/// In-memory storage for requirements, responses and embeddings
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    index: Arc<SimilarityIndex>,
}

impl MemoryStore {
    /// Create a new memory store instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch of requirements
    pub async fn insert_batch(&self, batch_id: impl Into<String>, requirements: Vec<Requirement>) {
        let batch_id = batch_id.into();
        let mut inner = self.inner.write().await;

        let ids = requirements.iter().map(|r| r.id).collect();
        for requirement in requirements {
            inner.requirements.insert(requirement.id, requirement);
        }
        debug!(batch_id = %batch_id, "Registered requirement batch");
        inner.batches.insert(batch_id, ids);
    }

    /// Build a store from a workspace snapshot
    pub fn from_workspace(workspace: Workspace) -> Result<Self> {
        let index = SimilarityIndex::from_records(workspace.embeddings)?;

        let mut inner = Inner::default();
        for (batch_id, requirements) in workspace.batches {
            let ids = requirements.iter().map(|r| r.id).collect();
            for requirement in requirements {
                inner.requirements.insert(requirement.id, requirement);
            }
            inner.batches.insert(batch_id, ids);
        }
        inner.responses = workspace.responses;

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            index: Arc::new(index),
        })
    }

    /// Snapshot the whole store
    pub async fn to_workspace(&self) -> Workspace {
        let inner = self.inner.read().await;
        let batches = inner
            .batches
            .iter()
            .map(|(batch_id, ids)| {
                let requirements = ids
                    .iter()
                    .filter_map(|id| inner.requirements.get(id).cloned())
                    .collect();
                (batch_id.clone(), requirements)
            })
            .collect();

        Workspace {
            batches,
            responses: inner.responses.clone(),
            embeddings: self.index.snapshot(),
        }
    }

    /// Load a workspace JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let workspace: Workspace = serde_json::from_str(&contents)?;
        info!(
            path = %path.display(),
            batches = workspace.batches.len(),
            responses = workspace.responses.len(),
            embeddings = workspace.embeddings.len(),
            "Loaded workspace"
        );
        Self::from_workspace(workspace)
    }

    /// Write the store to a workspace JSON file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let workspace = self.to_workspace().await;
        let contents = serde_json::to_string_pretty(&workspace)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(RfpError::Io)
    }

    /// Every response saved for one requirement, oldest first
    pub async fn responses_for(&self, requirement_id: RequirementId) -> Vec<AggregatedResponse> {
        self.inner
            .read()
            .await
            .responses
            .iter()
            .filter(|r| r.requirement_id == requirement_id)
            .cloned()
            .collect()
    }

    pub async fn responses(&self) -> Vec<AggregatedResponse> {
        self.inner.read().await.responses.clone()
    }

    pub async fn response(&self, id: ResponseId) -> Option<AggregatedResponse> {
        self.inner
            .read()
            .await
            .responses
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub async fn batch_ids(&self) -> Vec<String> {
        self.inner.read().await.batches.keys().cloned().collect()
    }

    pub fn embedding_count(&self) -> usize {
        self.index.len()
    }
}

#[async_trait]
impl ResponseStore for MemoryStore {
    async fn load_requirements(&self, batch_id: &str) -> StoreResult<Vec<Requirement>> {
        let inner = self.inner.read().await;
        let ids = inner
            .batches
            .get(batch_id)
            .ok_or_else(|| PersistenceError::BatchNotFound(batch_id.to_string()))?;

        ids.iter()
            .map(|id| {
                inner
                    .requirements
                    .get(id)
                    .cloned()
                    .ok_or(PersistenceError::RequirementNotFound(*id))
            })
            .collect()
    }

    async fn load_requirement(&self, id: RequirementId) -> StoreResult<Requirement> {
        self.inner
            .read()
            .await
            .requirements
            .get(&id)
            .cloned()
            .ok_or(PersistenceError::RequirementNotFound(id))
    }

    async fn save_aggregated_response(&self, response: &AggregatedResponse) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.responses.iter_mut().find(|r| r.id == response.id) {
            Some(existing) => *existing = response.clone(),
            None => inner.responses.push(response.clone()),
        }
        Ok(())
    }

    async fn load_responses(
        &self,
        requirement_id: RequirementId,
    ) -> StoreResult<Vec<AggregatedResponse>> {
        let mut responses = self.responses_for(requirement_id).await;
        // insertion order breaks created_at ties
        responses.reverse();
        responses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(responses)
    }

    async fn save_embedding(&self, record: &EmbeddingRecord) -> StoreResult<()> {
        self.index
            .insert(record.clone())
            .map_err(|e| PersistenceError::Backend(e.to_string()))
    }

    async fn query_embeddings(
        &self,
        vector: &[f32],
        category: Option<&str>,
        k: usize,
    ) -> StoreResult<Vec<ScoredRecord>> {
        let params = SearchParams {
            top_k: k,
            category: category.map(str::to_string),
            ..Default::default()
        };
        Ok(self.index.query(vector, &params))
    }

    async fn load_embeddings(&self) -> StoreResult<Vec<EmbeddingRecord>> {
        Ok(self.index.snapshot())
    }

    async fn attach_feedback(
        &self,
        response_id: ResponseId,
        rating: Option<i32>,
        feedback: Option<Feedback>,
    ) -> StoreResult<AggregatedResponse> {
        let mut inner = self.inner.write().await;
        let response = inner
            .responses
            .iter_mut()
            .find(|r| r.id == response_id)
            .ok_or(PersistenceError::ResponseNotFound(response_id))?;
        response.apply_feedback(rating, feedback);
        Ok(response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AggregationError;
    use crate::types::{ProviderMode, ResponseOutcome};
    use tempfile::TempDir;

    fn requirements() -> Vec<Requirement> {
        vec![
            Requirement::new(1, "Tax", "Describe tax lot accounting"),
            Requirement::new(2, "Reporting", "Describe client reporting"),
        ]
    }

    fn failed_response(requirement: &Requirement) -> AggregatedResponse {
        AggregatedResponse::new(
            requirement,
            ProviderMode::Moa,
            &[],
            Vec::new(),
            ResponseOutcome::Failed {
                error: AggregationError::AllProvidersFailed { attempted: 3 },
            },
        )
    }

    #[tokio::test]
    async fn test_load_requirements_in_order() {
        let store = MemoryStore::new();
        store.insert_batch("b1", requirements()).await;

        let loaded = store.load_requirements("b1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, RequirementId(1));
        assert_eq!(
            store.load_requirement(RequirementId(2)).await.unwrap().category,
            "Reporting"
        );
    }

    #[tokio::test]
    async fn test_missing_lookups() {
        let store = MemoryStore::new();
        assert_eq!(
            store.load_requirements("nope").await.unwrap_err(),
            PersistenceError::BatchNotFound("nope".to_string())
        );
        assert_eq!(
            store.load_requirement(RequirementId(7)).await.unwrap_err(),
            PersistenceError::RequirementNotFound(RequirementId(7))
        );
        let id = ResponseId::new();
        assert_eq!(
            store.attach_feedback(id, Some(1), None).await.unwrap_err(),
            PersistenceError::ResponseNotFound(id)
        );
    }

    #[tokio::test]
    async fn test_attach_feedback() {
        let store = MemoryStore::new();
        let reqs = requirements();
        let response = failed_response(&reqs[0]);
        store.save_aggregated_response(&response).await.unwrap();

        let updated = store
            .attach_feedback(response.id, Some(5), Some(Feedback::Negative))
            .await
            .unwrap();
        assert_eq!(updated.rating, Some(5));
        assert_eq!(
            store.response(response.id).await.unwrap().feedback,
            Some(Feedback::Negative)
        );
        assert_eq!(store.responses().await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_responses_newest_first() {
        let store = MemoryStore::new();
        let reqs = requirements();
        let older = failed_response(&reqs[0]);
        let mut newer = failed_response(&reqs[0]);
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        store.save_aggregated_response(&newer).await.unwrap();
        store.save_aggregated_response(&older).await.unwrap();
        store
            .save_aggregated_response(&failed_response(&reqs[1]))
            .await
            .unwrap();

        let loaded = store.load_responses(RequirementId(1)).await.unwrap();
        let ids: Vec<ResponseId> = loaded.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert!(store
            .load_responses(RequirementId(9))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_embeddings_append_and_query() {
        let store = MemoryStore::new();
        store
            .save_embedding(&EmbeddingRecord::new("Tax", "q1", "a1", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .save_embedding(&EmbeddingRecord::new("Reporting", "q2", "a2", vec![0.0, 1.0]))
            .await
            .unwrap();

        let all = store.query_embeddings(&[1.0, 0.0], None, 5).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].record.category, "Tax");

        let reporting = store
            .query_embeddings(&[1.0, 0.0], Some("Reporting"), 5)
            .await
            .unwrap();
        assert_eq!(reporting.len(), 1);

        let bad = store
            .save_embedding(&EmbeddingRecord::new("Tax", "q", "a", vec![1.0]))
            .await;
        assert!(matches!(bad, Err(PersistenceError::Backend(_))));
        assert_eq!(store.embedding_count(), 2);
    }

    #[tokio::test]
    async fn test_workspace_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workspace.json");

        let store = MemoryStore::new();
        let reqs = requirements();
        store.insert_batch("b1", reqs.clone()).await;
        store
            .save_aggregated_response(&failed_response(&reqs[1]))
            .await
            .unwrap();
        store
            .save_embedding(&EmbeddingRecord::new("Tax", "q", "a", vec![0.5, 0.5]))
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let loaded = MemoryStore::load(&path).await.unwrap();
        assert_eq!(loaded.to_workspace().await, store.to_workspace().await);
        assert_eq!(loaded.batch_ids().await, vec!["b1".to_string()]);
        assert_eq!(loaded.responses_for(RequirementId(2)).await.len(), 1);
        assert_eq!(loaded.embedding_count(), 1);
    }
}
