//! Per-requirement generation pipeline
//!
//! retrieve similar answers → fan out to providers → aggregate → persist →
//! embed the new answer for future retrieval

use futures_util::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::aggregator::ResponseAggregator;
use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::errors::{PersistenceError, ProviderError};
use crate::index::{SearchParams, SimilarityIndex};
use crate::providers::{Prompt, PromptBuilder, ProviderRegistry};
use crate::storage::ResponseStore;
use crate::telemetry::{TelemetryCollector, TelemetryEvent};
use crate::types::{
    AggregatedResponse, EmbeddingRecord, ProviderKind, ProviderMode, ProviderResponse,
    Requirement, SimilarMatch,
};

/// Everything needed to answer one requirement
#[derive(Clone)]
pub struct GenerationPipeline {
    registry: Arc<ProviderRegistry>,
    aggregator: ResponseAggregator,
    embedder: Arc<dyn Embedder>,
    index: Arc<SimilarityIndex>,
    store: Arc<dyn ResponseStore>,
    retrieval: RetrievalConfig,
    retry: RetryPolicy,
    prompts: PromptBuilder,
    telemetry: TelemetryCollector,
}

impl std::fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("registry", &self.registry)
            .field("indexed", &self.index.len())
            .field("retrieval", &self.retrieval)
            .finish()
    }
}

impl GenerationPipeline {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        aggregator: ResponseAggregator,
        embedder: Arc<dyn Embedder>,
        index: Arc<SimilarityIndex>,
        store: Arc<dyn ResponseStore>,
    ) -> Self {
        Self {
            registry,
            aggregator,
            embedder,
            index,
            store,
            retrieval: RetrievalConfig::default(),
            retry: RetryPolicy::default(),
            prompts: PromptBuilder::new(),
            telemetry: TelemetryCollector::new(),
        }
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn store(&self) -> &Arc<dyn ResponseStore> {
        &self.store
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    /// Answer one requirement and persist the result.
    ///
    /// Provider, synthesis and embedding failures are absorbed into the
    /// returned record; only a failed save of that record is an error.
    pub async fn run(
        &self,
        requirement: &Requirement,
        mode: ProviderMode,
    ) -> Result<AggregatedResponse, PersistenceError> {
        let started = Instant::now();

        let (vector, similar) = self.retrieve(requirement).await;
        let responses = self.fan_out(requirement, mode, &similar).await;
        let aggregated = self
            .aggregator
            .aggregate(requirement, mode, &responses, similar)
            .await;

        self.store.save_aggregated_response(&aggregated).await?;

        if let (Some(vector), Some(text)) = (vector, aggregated.final_text()) {
            self.remember(requirement, &aggregated, text, vector).await;
        }

        info!(
            requirement_id = %requirement.id,
            mode = %mode,
            answered = aggregated.is_answered(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Requirement processed"
        );
        Ok(aggregated)
    }

    /// Embed the requirement and look up similar historical answers.
    /// Any failure yields an empty context.
    async fn retrieve(&self, requirement: &Requirement) -> (Option<Vec<f32>>, Vec<SimilarMatch>) {
        let vector = match self.embedder.embed(&requirement.text).await {
            Ok(vector) => vector,
            Err(error) => {
                warn!(
                    requirement_id = %requirement.id,
                    error = %error,
                    "Embedding failed; continuing without similar answers"
                );
                self.telemetry.record(TelemetryEvent::RetrievalDegraded {
                    requirement_id: requirement.id,
                    reason: error.to_string(),
                    timestamp: Instant::now(),
                });
                return (None, Vec::new());
            }
        };

        let params = SearchParams {
            top_k: self.retrieval.top_k,
            min_score: self.retrieval.min_score,
            category: self
                .retrieval
                .same_category_only
                .then(|| requirement.category.clone()),
            exclude_requirement: self.retrieval.exclude_self.then_some(requirement.id),
        };

        let similar: Vec<SimilarMatch> = self
            .index
            .query(&vector, &params)
            .iter()
            .enumerate()
            .map(|(i, hit)| hit.record.to_match(hit.score, i + 1))
            .collect();

        debug!(
            requirement_id = %requirement.id,
            matches = similar.len(),
            "Retrieved similar answers"
        );
        (Some(vector), similar)
    }

    /// Call every provider selected by `mode` in parallel and join
    async fn fan_out(
        &self,
        requirement: &Requirement,
        mode: ProviderMode,
        similar: &[SimilarMatch],
    ) -> Vec<ProviderResponse> {
        let prompt = self.prompts.requirement_prompt(requirement, similar);
        let providers = self.registry.for_mode(mode);

        let calls = providers.into_iter().map(|kind| {
            let prompt = &prompt;
            async move { self.call_provider(kind, requirement, prompt).await }
        });

        join_all(calls).await
    }

    async fn call_provider(
        &self,
        kind: ProviderKind,
        requirement: &Requirement,
        prompt: &Prompt,
    ) -> ProviderResponse {
        let Some(client) = self.registry.get(kind) else {
            return ProviderResponse::failure(
                kind,
                ProviderError::Unavailable(format!("{} is not configured", kind)),
                0,
            );
        };

        let telemetry = self.telemetry.clone();
        let response = self
            .retry
            .call(
                client.as_ref(),
                prompt,
                self.registry.timeout(kind),
                |attempt, _| {
                    telemetry.record(TelemetryEvent::RetryAttempt {
                        provider: kind,
                        attempt,
                        timestamp: Instant::now(),
                    })
                },
            )
            .await;

        if let Err(error) = &response.outcome {
            warn!(
                requirement_id = %requirement.id,
                provider = %kind,
                error = %error,
                latency_ms = response.latency_ms,
                "Provider call failed"
            );
        }
        self.telemetry.record(TelemetryEvent::ProviderCall {
            provider: kind,
            latency_ms: response.latency_ms,
            error: response.outcome.as_ref().err().map(ProviderError::label),
            timestamp: Instant::now(),
        });
        response
    }

    /// Persist and index the embedding of an answered requirement
    async fn remember(
        &self,
        requirement: &Requirement,
        aggregated: &AggregatedResponse,
        text: &str,
        vector: Vec<f32>,
    ) {
        let record = EmbeddingRecord::new(
            requirement.category.clone(),
            requirement.text.clone(),
            text,
            vector,
        )
        .for_requirement(requirement.id)
        .with_payload("response_id", json!(aggregated.id.to_string()))
        .with_payload("mode", json!(aggregated.mode.to_string()));

        if let Err(error) = self.store.save_embedding(&record).await {
            warn!(
                requirement_id = %requirement.id,
                error = %error,
                "Failed to persist embedding"
            );
            return;
        }

        if let Err(error) = self.index.insert(record) {
            warn!(
                requirement_id = %requirement.id,
                error = %error,
                "Failed to index embedding"
            );
        }
    }
}
