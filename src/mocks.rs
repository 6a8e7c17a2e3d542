//! Mock collaborators for tests and demos
//!
//! Scripted providers, a failing embedder and a store that can be told to
//! reject writes. None of them touch the network.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::embedding::Embedder;
use crate::errors::{EmbeddingError, PersistenceError, ProviderError};
use crate::providers::{Prompt, ProviderClient};
use crate::storage::{MemoryStore, ResponseStore, StoreResult};
use crate::types::{
    AggregatedResponse, EmbeddingRecord, Feedback, ProviderKind, Requirement, RequirementId,
    ResponseId, ScoredRecord,
};

/// Provider that replays scripted outcomes
///
/// Outcomes are consumed in order; once the script runs out the fallback
/// outcome is returned for every further call.
#[derive(Debug, Clone)]
pub struct MockProvider {
    kind: ProviderKind,
    script: Arc<Mutex<VecDeque<Result<String, ProviderError>>>>,
    fallback: Result<String, ProviderError>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<Prompt>>>,
    panics: Arc<AtomicUsize>,
}

impl MockProvider {
    fn with_fallback(kind: ProviderKind, fallback: Result<String, ProviderError>) -> Self {
        Self {
            kind,
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
            panics: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always answers with `text`
    pub fn answering(kind: ProviderKind, text: impl Into<String>) -> Self {
        Self::with_fallback(kind, Ok(text.into()))
    }

    /// Always fails with `error`
    pub fn failing(kind: ProviderKind, error: ProviderError) -> Self {
        Self::with_fallback(kind, Err(error))
    }

    /// Sleeps far longer than any test timeout
    pub fn hanging(kind: ProviderKind) -> Self {
        Self::answering(kind, "never delivered").with_delay(Duration::from_secs(3600))
    }

    /// Outcomes returned before the fallback applies
    pub fn with_script(self, outcomes: Vec<Result<String, ProviderError>>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(outcomes);
        self
    }

    /// The next `count` calls panic instead of returning
    pub fn panicking_first(self, count: usize) -> Self {
        self.panics.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `generate` calls started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `generate` calls observed
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Decrements the in-flight gauge even when the call future is dropped
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(&self, prompt: &Prompt, _timeout: Duration) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self
            .panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("{} adapter panicked", self.kind);
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Embedder that always fails
#[derive(Debug, Clone, Default)]
pub struct FailingEmbedder {
    pub dimension: usize,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Request("embedding service offline".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// `MemoryStore` wrapper that rejects selected writes
#[derive(Debug, Clone, Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    fail_responses_for: HashSet<RequirementId>,
    fail_all_responses: bool,
    fail_embeddings: bool,
    response_delay: Duration,
}

impl FailingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    /// Reject `save_aggregated_response` for these requirements
    pub fn failing_responses_for(mut self, ids: impl IntoIterator<Item = RequirementId>) -> Self {
        self.fail_responses_for.extend(ids);
        self
    }

    /// Reject every `save_aggregated_response`
    pub fn failing_all_responses(mut self) -> Self {
        self.fail_all_responses = true;
        self
    }

    /// Reject every `save_embedding`
    pub fn failing_embeddings(mut self) -> Self {
        self.fail_embeddings = true;
        self
    }

    /// Slow down response writes
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }
}

#[async_trait]
impl ResponseStore for FailingStore {
    async fn load_requirements(&self, batch_id: &str) -> StoreResult<Vec<Requirement>> {
        self.inner.load_requirements(batch_id).await
    }

    async fn load_requirement(&self, id: RequirementId) -> StoreResult<Requirement> {
        self.inner.load_requirement(id).await
    }

    async fn save_aggregated_response(&self, response: &AggregatedResponse) -> StoreResult<()> {
        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }
        if self.fail_all_responses || self.fail_responses_for.contains(&response.requirement_id) {
            return Err(PersistenceError::Backend(format!(
                "write rejected for requirement {}",
                response.requirement_id
            )));
        }
        self.inner.save_aggregated_response(response).await
    }

    async fn load_responses(
        &self,
        requirement_id: RequirementId,
    ) -> StoreResult<Vec<AggregatedResponse>> {
        self.inner.load_responses(requirement_id).await
    }

    async fn save_embedding(&self, record: &EmbeddingRecord) -> StoreResult<()> {
        if self.fail_embeddings {
            return Err(PersistenceError::Backend("embedding write rejected".to_string()));
        }
        self.inner.save_embedding(record).await
    }

    async fn query_embeddings(
        &self,
        vector: &[f32],
        category: Option<&str>,
        k: usize,
    ) -> StoreResult<Vec<ScoredRecord>> {
        self.inner.query_embeddings(vector, category, k).await
    }

    async fn load_embeddings(&self) -> StoreResult<Vec<EmbeddingRecord>> {
        self.inner.load_embeddings().await
    }

    async fn attach_feedback(
        &self,
        response_id: ResponseId,
        rating: Option<i32>,
        feedback: Option<Feedback>,
    ) -> StoreResult<AggregatedResponse> {
        self.inner.attach_feedback(response_id, rating, feedback).await
    }
}

/// `count` requirements with ids `1..=count`
pub fn sample_requirements(count: u64) -> Vec<Requirement> {
    const CATEGORIES: [&str; 3] = ["Reporting", "Tax", "Security"];
    (1..=count)
        .map(|id| {
            Requirement::new(
                id,
                CATEGORIES[(id as usize) % CATEGORIES.len()],
                format!("Requirement {}: describe capability {}", id, id),
            )
        })
        .collect()
}
