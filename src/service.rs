//! Service facade
//!
//! The surface a presentation or API layer drives: start, observe and cancel
//! batches per scope, answer a single requirement on demand, and record
//! reviewer feedback. One `BulkOrchestrator` is created lazily per scope and
//! reused, so single-flight holds across calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregator::ResponseAggregator;
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::errors::{OrchestrationError, PersistenceError, Result};
use crate::index::SimilarityIndex;
use crate::orchestrator::{
    BatchSummary, BulkOrchestrator, GenerationPipeline, ProgressSnapshot, RetryPolicy,
};
use crate::providers::{PromptBuilder, ProviderRegistry};
use crate::storage::ResponseStore;
use crate::telemetry::TelemetryCollector;
use crate::types::{
    AggregatedResponse, Feedback, ProviderMode, Requirement, RequirementId, ResponseId,
};

/// Caller-held reference to one started batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchHandle {
    pub scope: String,
    pub batch_id: Uuid,
}

pub struct RfpService {
    config: Config,
    pipeline: Arc<GenerationPipeline>,
    store: Arc<dyn ResponseStore>,
    telemetry: TelemetryCollector,
    scopes: Mutex<HashMap<String, Arc<BulkOrchestrator>>>,
}

impl std::fmt::Debug for RfpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RfpService")
            .field("pipeline", &self.pipeline)
            .field("scopes", &self.lock_scopes().len())
            .finish()
    }
}

impl RfpService {
    /// Wire the pipeline and warm the similarity index from stored embeddings
    pub async fn new(
        config: Config,
        registry: ProviderRegistry,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn ResponseStore>,
    ) -> Result<Self> {
        let telemetry = TelemetryCollector::new();
        let registry = Arc::new(registry);

        let records = store.load_embeddings().await?;
        let warmed = records.len();
        let index = Arc::new(SimilarityIndex::from_records(records)?);
        debug!(records = warmed, "Similarity index warmed");

        let aggregator = ResponseAggregator::new(registry.clone(), config.synthesis.clone())
            .with_prompt_builder(PromptBuilder::new())
            .with_telemetry(telemetry.clone());

        let pipeline = GenerationPipeline::new(
            registry,
            aggregator,
            embedder,
            index,
            store.clone(),
        )
        .with_retrieval(config.retrieval.clone())
        .with_retry(RetryPolicy::from(&config.retry))
        .with_telemetry(telemetry.clone());

        info!(
            providers = ?pipeline.registry().available(),
            indexed = pipeline.index().len(),
            "Service ready"
        );

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            store,
            telemetry,
            scopes: Mutex::new(HashMap::new()),
        })
    }

    /// Build adapters and the embedder from configuration
    pub async fn from_config(config: Config, store: Arc<dyn ResponseStore>) -> Result<Self> {
        let registry = ProviderRegistry::from_config(&config)?;
        let embedder = embedding::from_config(&config.embedding)?;
        Self::new(config, registry, embedder, store).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    pub fn pipeline(&self) -> &GenerationPipeline {
        &self.pipeline
    }

    fn lock_scopes(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<BulkOrchestrator>>> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn orchestrator(&self, scope: &str) -> Arc<BulkOrchestrator> {
        self.lock_scopes()
            .entry(scope.to_string())
            .or_insert_with(|| {
                Arc::new(BulkOrchestrator::new(
                    scope,
                    self.pipeline.clone(),
                    self.config.batch.clone(),
                ))
            })
            .clone()
    }

    fn existing(&self, scope: &str) -> Option<Arc<BulkOrchestrator>> {
        self.lock_scopes().get(scope).cloned()
    }

    /// Start a batch in `scope`; `concurrency` defaults to the configured value
    pub fn start_batch(
        &self,
        scope: &str,
        requirements: Vec<Requirement>,
        concurrency: Option<usize>,
        mode: ProviderMode,
    ) -> Result<BatchHandle> {
        let concurrency = concurrency.unwrap_or(self.config.batch.default_concurrency);
        let ticket = self
            .orchestrator(scope)
            .start(requirements, concurrency, mode)?;

        Ok(BatchHandle {
            scope: scope.to_string(),
            batch_id: ticket.batch_id,
        })
    }

    /// Start a batch over the requirements stored under `batch_id`
    pub async fn start_batch_from_store(
        &self,
        scope: &str,
        batch_id: &str,
        concurrency: Option<usize>,
        mode: ProviderMode,
    ) -> Result<BatchHandle> {
        let requirements = self.store.load_requirements(batch_id).await?;
        self.start_batch(scope, requirements, concurrency, mode)
    }

    /// Current progress of the handle's scope.
    ///
    /// A handle whose batch has already been reset sees the scope's current
    /// snapshot, which is idle unless a newer batch started.
    pub fn progress(&self, handle: &BatchHandle) -> ProgressSnapshot {
        self.existing(&handle.scope)
            .map(|orch| orch.progress())
            .unwrap_or_else(ProgressSnapshot::idle)
    }

    /// Request cancellation. A stale handle is a no-op.
    pub fn cancel_batch(&self, handle: &BatchHandle) -> Result<()> {
        if let Some(orch) = self.existing(&handle.scope) {
            orch.cancel_batch(handle.batch_id);
        }
        Ok(())
    }

    /// Resolve once the handle's batch is terminal
    pub async fn wait(&self, handle: &BatchHandle) -> Option<BatchSummary> {
        let orch = self.existing(&handle.scope)?;
        orch.wait(handle.batch_id).await
    }

    pub fn subscribe(&self, scope: &str) -> watch::Receiver<ProgressSnapshot> {
        self.orchestrator(scope).subscribe()
    }

    /// Answer one stored requirement outside any batch
    pub async fn generate_single(
        &self,
        requirement_id: RequirementId,
        mode: ProviderMode,
    ) -> Result<AggregatedResponse> {
        if self.pipeline.registry().for_mode(mode).is_empty() {
            return Err(OrchestrationError::NoProviders {
                mode: mode.to_string(),
            }
            .into());
        }

        let requirement = self.store.load_requirement(requirement_id).await?;
        let response = self.pipeline.run(&requirement, mode).await?;
        Ok(response)
    }

    /// Every stored answer for a requirement, newest first
    pub async fn responses_for(
        &self,
        requirement_id: RequirementId,
    ) -> Result<Vec<AggregatedResponse>> {
        self.store.load_requirement(requirement_id).await?;
        Ok(self.store.load_responses(requirement_id).await?)
    }

    /// The most recent answer for a requirement
    pub async fn latest_response(&self, requirement_id: RequirementId) -> Result<AggregatedResponse> {
        self.responses_for(requirement_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PersistenceError::NoResponse(requirement_id).into())
    }

    pub async fn attach_feedback(
        &self,
        response_id: ResponseId,
        rating: Option<i32>,
        feedback: Option<Feedback>,
    ) -> Result<AggregatedResponse> {
        let response = self
            .store
            .attach_feedback(response_id, rating, feedback)
            .await?;
        info!(response_id = %response_id, rating = ?rating, "Feedback recorded");
        Ok(response)
    }
}
