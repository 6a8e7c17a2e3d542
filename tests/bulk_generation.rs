//! Integration tests for bulk generation
//!
//! Drives `BulkOrchestrator` end to end with scripted providers; nothing
//! here touches the network.

use std::sync::Arc;
use std::time::Duration;

use rfpbuddy::aggregator::ResponseAggregator;
use rfpbuddy::config::{BatchConfig, SynthesisConfig};
use rfpbuddy::embedding::HashingEmbedder;
use rfpbuddy::errors::{OrchestrationError, ProviderError};
use rfpbuddy::index::SimilarityIndex;
use rfpbuddy::mocks::{sample_requirements, FailingStore, MockProvider};
use rfpbuddy::orchestrator::{
    BatchState, BatchSummary, BulkOrchestrator, GenerationPipeline, ProgressSnapshot, RetryPolicy,
};
use rfpbuddy::providers::ProviderRegistry;
use rfpbuddy::storage::{MemoryStore, ResponseStore};
use rfpbuddy::types::{
    AnswerSource, ProviderKind, ProviderMode, Requirement, RequirementId, ResponseOutcome,
};

const PROVIDER_TIMEOUT: Duration = Duration::from_millis(100);

fn registry(providers: &[MockProvider]) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(Arc::new(provider.clone()), PROVIDER_TIMEOUT);
    }
    Arc::new(registry)
}

fn orchestrator_with_store(
    providers: &[MockProvider],
    store: Arc<dyn ResponseStore>,
    grace_ms: u64,
) -> BulkOrchestrator {
    let registry = registry(providers);
    let aggregator = ResponseAggregator::new(registry.clone(), SynthesisConfig::default());
    let pipeline = GenerationPipeline::new(
        registry,
        aggregator,
        Arc::new(HashingEmbedder::new(64)),
        Arc::new(SimilarityIndex::new()),
        store,
    )
    .with_retry(RetryPolicy::none());

    let settings = BatchConfig {
        default_concurrency: 2,
        max_concurrency: 8,
        grace_period_ms: grace_ms,
    };
    BulkOrchestrator::new("rfp-42", Arc::new(pipeline), settings)
}

fn orchestrator(providers: &[MockProvider], grace_ms: u64) -> (BulkOrchestrator, MemoryStore) {
    let store = MemoryStore::new();
    let orch = orchestrator_with_store(providers, Arc::new(store.clone()), grace_ms);
    (orch, store)
}

fn all_providers() -> Vec<MockProvider> {
    vec![
        MockProvider::answering(ProviderKind::OpenAi, "openai answer"),
        MockProvider::answering(ProviderKind::Anthropic, "anthropic answer"),
        MockProvider::answering(ProviderKind::DeepSeek, "deepseek answer"),
    ]
}

async fn wait(orch: &BulkOrchestrator, batch_id: uuid::Uuid) -> BatchSummary {
    tokio::time::timeout(Duration::from_secs(5), orch.wait(batch_id))
        .await
        .expect("batch did not finish in time")
        .expect("batch summary missing")
}

#[tokio::test]
async fn test_full_batch_synthesizes_every_requirement() {
    let (orch, store) = orchestrator(&all_providers(), 50);
    let mut updates = orch.subscribe();

    let ticket = orch
        .start(sample_requirements(5), 2, ProviderMode::Moa)
        .unwrap();

    let observer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            let done = snapshot.state.is_terminal() || snapshot.state == BatchState::Idle;
            seen.push(snapshot);
            if done {
                break;
            }
        }
        seen
    });

    let summary = wait(&orch, ticket.batch_id).await;
    assert_eq!(summary.state, BatchState::Completed);
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.answered, 5);
    assert_eq!(summary.errored, 0);

    let responses = store.responses().await;
    assert_eq!(responses.len(), 5);
    for response in &responses {
        assert!(matches!(
            response.outcome,
            ResponseOutcome::Answered {
                source: AnswerSource::Synthesized {
                    synthesizer: ProviderKind::OpenAi
                },
                ..
            }
        ));
        assert_eq!(response.provider_responses.len(), 3);
    }

    // Terminal snapshot is never "processing"
    let terminal = orch.progress();
    assert_eq!(terminal.state, BatchState::Completed);
    assert!(!terminal.is_processing);
    assert_eq!(terminal.completed, terminal.total);

    let seen = observer.await.unwrap();
    assert!(seen
        .windows(2)
        .all(|pair| pair[0].completed <= pair[1].completed));
    assert!(seen.iter().all(|s| s.completed <= s.total));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(orch.progress(), ProgressSnapshot::idle());
}

#[tokio::test]
async fn test_survivor_answer_used_when_others_time_out() {
    let providers = vec![
        MockProvider::hanging(ProviderKind::OpenAi),
        MockProvider::hanging(ProviderKind::Anthropic),
        MockProvider::answering(ProviderKind::DeepSeek, "deepseek survives"),
    ];
    let (orch, store) = orchestrator(&providers, 0);

    let requirement = Requirement::new(1, "Tax", "Describe cost basis tracking");
    let ticket = orch
        .start(vec![requirement], 1, ProviderMode::Moa)
        .unwrap();
    let summary = wait(&orch, ticket.batch_id).await;
    assert_eq!(summary.answered, 1);

    let response = store.responses_for(RequirementId(1)).await.remove(0);
    assert_eq!(response.final_text(), Some("deepseek survives"));
    assert!(response.error().is_none());
    assert_eq!(response.provider_text(ProviderKind::OpenAi), None);
    assert_eq!(
        response.outcome,
        ResponseOutcome::Answered {
            text: "deepseek survives".to_string(),
            source: AnswerSource::SingleProvider {
                provider: ProviderKind::DeepSeek
            },
        }
    );
}

#[tokio::test]
async fn test_all_providers_failing_still_completes_batch() {
    let providers = vec![
        MockProvider::failing(
            ProviderKind::OpenAi,
            ProviderError::InvalidResponse("empty".into()),
        ),
        MockProvider::hanging(ProviderKind::DeepSeek),
    ];
    let (orch, store) = orchestrator(&providers, 0);

    let ticket = orch
        .start(sample_requirements(2), 2, ProviderMode::Moa)
        .unwrap();
    let summary = wait(&orch, ticket.batch_id).await;

    assert_eq!(summary.state, BatchState::Completed);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 2);
    for response in store.responses().await {
        assert!(!response.is_answered());
    }
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let providers = vec![MockProvider::answering(ProviderKind::OpenAi, "slow")
        .with_delay(Duration::from_millis(50))];
    let (orch, _) = orchestrator(&providers, 0);

    let ticket = orch
        .start(sample_requirements(3), 1, ProviderMode::Moa)
        .unwrap();
    let before = orch.progress();

    let err = orch
        .start(sample_requirements(7), 2, ProviderMode::Moa)
        .unwrap_err();
    assert_eq!(
        err,
        OrchestrationError::AlreadyRunning {
            scope: "rfp-42".to_string()
        }
    );

    let after = orch.progress();
    assert_eq!(after.batch_id, Some(ticket.batch_id));
    assert_eq!(after.total, before.total);
    assert_eq!(after.total, 3);

    let summary = wait(&orch, ticket.batch_id).await;
    assert_eq!(summary.completed, 3);
}

#[tokio::test]
async fn test_cancel_drains_in_flight_and_stops_dispatch() {
    let provider = MockProvider::answering(ProviderKind::OpenAi, "answer")
        .with_delay(Duration::from_millis(60));
    let (orch, store) = orchestrator(&[provider], 50);

    let ticket = orch
        .start(sample_requirements(10), 2, ProviderMode::Moa)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(orch.cancel());
    let cancelled = orch.progress();
    assert!(cancelled.cancel_requested);
    assert!(cancelled.is_processing);

    let summary = wait(&orch, ticket.batch_id).await;
    assert_eq!(summary.state, BatchState::Cancelled);
    assert_eq!(summary.completed, summary.dispatched);
    assert!(summary.completed >= cancelled.completed);
    assert!(summary.skipped() > 0);
    assert_eq!(store.responses().await.len(), summary.completed);
    assert!(!orch.progress().is_processing);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(orch.progress(), ProgressSnapshot::idle());
    assert!(!orch.cancel());
}

#[tokio::test]
async fn test_concurrency_limit_bounds_provider_calls() {
    let providers: Vec<MockProvider> = all_providers()
        .into_iter()
        .map(|p| p.with_delay(Duration::from_millis(20)))
        .collect();
    let (orch, _) = orchestrator(&providers, 0);

    let ticket = orch
        .start(sample_requirements(9), 3, ProviderMode::Moa)
        .unwrap();
    let summary = wait(&orch, ticket.batch_id).await;
    assert_eq!(summary.completed, 9);

    for provider in &providers {
        assert!(provider.max_concurrent() <= 3);
    }
}

#[tokio::test]
async fn test_persistence_failure_marks_requirement_errored() {
    let memory = MemoryStore::new();
    let store = FailingStore::new(memory.clone()).failing_responses_for([RequirementId(2)]);
    let orch = orchestrator_with_store(&all_providers(), Arc::new(store), 0);

    let ticket = orch
        .start(sample_requirements(3), 2, ProviderMode::Moa)
        .unwrap();
    let summary = wait(&orch, ticket.batch_id).await;

    assert_eq!(summary.state, BatchState::Completed);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.answered, 2);
    assert_eq!(summary.errored, 1);
    assert!(memory.responses_for(RequirementId(2)).await.is_empty());
    assert_eq!(memory.responses().await.len(), 2);
}

#[tokio::test]
async fn test_invalid_concurrency_never_starts() {
    let (orch, _) = orchestrator(&all_providers(), 0);
    let err = orch
        .start(sample_requirements(2), 0, ProviderMode::Moa)
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::InvalidConcurrencyLimit { requested: 0, .. }
    ));
    assert_eq!(orch.progress(), ProgressSnapshot::idle());
}

#[tokio::test]
async fn test_new_batch_during_grace_is_not_reset_by_previous() {
    let providers = vec![
        MockProvider::answering(ProviderKind::OpenAi, "fast"),
        MockProvider::answering(ProviderKind::Anthropic, "slow")
            .with_delay(Duration::from_millis(80)),
    ];
    // Generous provider timeout for the slow adapter
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(providers[0].clone()), Duration::from_secs(5));
    registry.register(Arc::new(providers[1].clone()), Duration::from_secs(5));
    let registry = Arc::new(registry);
    let aggregator = ResponseAggregator::new(registry.clone(), SynthesisConfig::default());
    let store = MemoryStore::new();
    let pipeline = GenerationPipeline::new(
        registry,
        aggregator,
        Arc::new(HashingEmbedder::new(64)),
        Arc::new(SimilarityIndex::new()),
        Arc::new(store),
    )
    .with_retry(RetryPolicy::none());
    let settings = BatchConfig {
        default_concurrency: 1,
        max_concurrency: 4,
        grace_period_ms: 30,
    };
    let orch = BulkOrchestrator::new("rfp-42", Arc::new(pipeline), settings);

    let first = orch
        .start(sample_requirements(1), 1, ProviderMode::Single(ProviderKind::OpenAi))
        .unwrap();
    wait(&orch, first.batch_id).await;

    // Still inside the first batch's grace interval
    let second = orch
        .start(
            sample_requirements(5),
            1,
            ProviderMode::Single(ProviderKind::Anthropic),
        )
        .unwrap();

    // Past the first batch's grace interval; the second is still running
    tokio::time::sleep(Duration::from_millis(120)).await;
    let snapshot = orch.progress();
    assert_eq!(snapshot.batch_id, Some(second.batch_id));
    assert!(snapshot.is_processing);
    assert_eq!(snapshot.total, 5);

    orch.cancel();
    let summary = wait(&orch, second.batch_id).await;
    assert_eq!(summary.state, BatchState::Cancelled);
}

#[tokio::test]
async fn test_panicking_provider_fails_batch_then_resets() {
    let provider = MockProvider::answering(ProviderKind::OpenAi, "recovered").panicking_first(4);
    let (orch, store) = orchestrator(&[provider.clone()], 30);

    let ticket = orch
        .start(sample_requirements(4), 2, ProviderMode::Moa)
        .unwrap();
    let summary = wait(&orch, ticket.batch_id).await;

    assert_eq!(summary.state, BatchState::Failed);
    assert_eq!(summary.total, 4);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.errored, 4);
    assert_eq!(summary.answered, 0);
    assert!(store.responses().await.is_empty());

    assert!(!orch.progress().is_processing);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(orch.progress(), ProgressSnapshot::idle());

    let retry = orch
        .start(sample_requirements(2), 2, ProviderMode::Moa)
        .unwrap();
    assert_ne!(retry.batch_id, ticket.batch_id);
    let summary = wait(&orch, retry.batch_id).await;
    assert_eq!(summary.state, BatchState::Completed);
    assert_eq!(summary.answered, 2);
    assert_eq!(provider.calls(), 6);
}
