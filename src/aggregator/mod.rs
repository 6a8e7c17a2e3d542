//! Response aggregation (mixture-of-agents)
//!
//! Turns the provider outputs for one requirement into a single
//! `AggregatedResponse`:
//! - no survivors: `AllProvidersFailed`, nothing synthesized
//! - one survivor: its text verbatim
//! - several: a synthesis call, falling back to the configured priority
//!   order when that call fails
//!
//! Retries are the orchestrator's business; this module calls the
//! synthesizer exactly once.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SynthesisConfig;
use crate::errors::{AggregationError, ProviderError};
use crate::providers::{call_with_timeout, PromptBuilder, ProviderRegistry};
use crate::telemetry::{TelemetryCollector, TelemetryEvent};
use crate::types::{
    AggregatedResponse, AnswerSource, ProviderKind, ProviderMode, ProviderResponse, Requirement,
    ResponseOutcome, SimilarMatch,
};

/// Mixture-of-agents aggregator
#[derive(Debug, Clone)]
pub struct ResponseAggregator {
    registry: Arc<ProviderRegistry>,
    prompts: PromptBuilder,
    synthesis: SynthesisConfig,
    telemetry: Option<TelemetryCollector>,
}

impl ResponseAggregator {
    pub fn new(registry: Arc<ProviderRegistry>, synthesis: SynthesisConfig) -> Self {
        Self {
            registry,
            prompts: PromptBuilder::new(),
            synthesis,
            telemetry: None,
        }
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn synthesis_config(&self) -> &SynthesisConfig {
        &self.synthesis
    }

    /// Build the durable record for `requirement`
    pub async fn aggregate(
        &self,
        requirement: &Requirement,
        mode: ProviderMode,
        responses: &[ProviderResponse],
        similar: Vec<SimilarMatch>,
    ) -> AggregatedResponse {
        let outcome = self.compose(requirement, responses, &similar).await;
        AggregatedResponse::new(requirement, mode, responses, similar, outcome)
    }

    /// Decide the final text (or failure) for one requirement
    pub async fn compose(
        &self,
        requirement: &Requirement,
        responses: &[ProviderResponse],
        similar: &[SimilarMatch],
    ) -> ResponseOutcome {
        let successes: Vec<(ProviderKind, &str)> = responses
            .iter()
            .filter_map(|r| r.text().map(|t| (r.provider, t)))
            .filter(|(_, t)| !t.trim().is_empty())
            .collect();

        match successes.as_slice() {
            [] => {
                warn!(
                    requirement_id = %requirement.id,
                    attempted = responses.len(),
                    "All providers failed"
                );
                ResponseOutcome::Failed {
                    error: AggregationError::AllProvidersFailed {
                        attempted: responses.len(),
                    },
                }
            }
            [(provider, text)] => {
                debug!(
                    requirement_id = %requirement.id,
                    provider = %provider,
                    "Single provider answer used verbatim"
                );
                ResponseOutcome::Answered {
                    text: (*text).to_string(),
                    source: AnswerSource::SingleProvider {
                        provider: *provider,
                    },
                }
            }
            many => self.synthesize(requirement, many, similar).await,
        }
    }

    async fn synthesize(
        &self,
        requirement: &Requirement,
        answers: &[(ProviderKind, &str)],
        similar: &[SimilarMatch],
    ) -> ResponseOutcome {
        let synthesizer = self.synthesis.synthesizer;
        let started = Instant::now();

        let result = match self.registry.get(synthesizer) {
            Some(client) => {
                let prompt = self.prompts.synthesis_prompt(requirement, answers, similar);
                call_with_timeout(client.as_ref(), &prompt, self.synthesis.timeout())
                    .await
                    .outcome
                    .and_then(|text| {
                        if text.trim().is_empty() {
                            Err(ProviderError::InvalidResponse(
                                "synthesizer returned empty text".to_string(),
                            ))
                        } else {
                            Ok(text)
                        }
                    })
            }
            None => Err(ProviderError::Unavailable(format!(
                "synthesizer {} is not configured",
                synthesizer
            ))),
        };

        self.record(TelemetryEvent::Synthesis {
            synthesizer,
            success: result.is_ok(),
            timestamp: Instant::now(),
        });

        match result {
            Ok(text) => {
                info!(
                    requirement_id = %requirement.id,
                    synthesizer = %synthesizer,
                    inputs = answers.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Synthesized answer"
                );
                ResponseOutcome::Answered {
                    text,
                    source: AnswerSource::Synthesized { synthesizer },
                }
            }
            Err(error) => {
                let (provider, text) = self.fallback(answers);
                warn!(
                    requirement_id = %requirement.id,
                    synthesizer = %synthesizer,
                    fallback = %provider,
                    error = %error,
                    "Synthesis failed; using fallback answer"
                );
                ResponseOutcome::Answered {
                    text: text.to_string(),
                    source: AnswerSource::Fallback {
                        provider,
                        reason: error.to_string(),
                    },
                }
            }
        }
    }

    /// Highest-priority surviving answer; unlisted providers rank last in
    /// arrival order
    fn fallback<'a>(&self, answers: &[(ProviderKind, &'a str)]) -> (ProviderKind, &'a str) {
        let preferred = self
            .synthesis
            .fallback_order
            .iter()
            .find_map(|kind| answers.iter().find(|(p, _)| p == kind));

        // `answers` has at least two entries whenever this runs
        match preferred.or_else(|| answers.first()) {
            Some((provider, text)) => (*provider, *text),
            None => (self.synthesis.synthesizer, ""),
        }
    }

    fn record(&self, event: TelemetryEvent) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockProvider;
    use std::time::Duration;

    fn requirement() -> Requirement {
        Requirement::new(3, "Security", "Describe data encryption")
    }

    fn synthesis(order: Vec<ProviderKind>) -> SynthesisConfig {
        SynthesisConfig {
            synthesizer: ProviderKind::OpenAi,
            fallback_order: order,
            timeout_secs: 1,
        }
    }

    fn ok(kind: ProviderKind, text: &str) -> ProviderResponse {
        ProviderResponse::success(kind, text, 10)
    }

    fn timed_out(kind: ProviderKind) -> ProviderResponse {
        ProviderResponse::failure(kind, ProviderError::Timeout { duration_ms: 1000 }, 1000)
    }

    #[tokio::test]
    async fn test_zero_successes_fails_without_synthesis() {
        let synth = MockProvider::answering(ProviderKind::OpenAi, "merged");
        let registry = Arc::new(ProviderRegistry::new().with(Arc::new(synth.clone())));
        let aggregator = ResponseAggregator::new(registry, synthesis(ProviderKind::ALL.to_vec()));

        let resp = aggregator
            .aggregate(
                &requirement(),
                ProviderMode::Moa,
                &[timed_out(ProviderKind::OpenAi), timed_out(ProviderKind::Anthropic)],
                Vec::new(),
            )
            .await;

        assert_eq!(
            resp.error(),
            Some(AggregationError::AllProvidersFailed { attempted: 2 })
        );
        assert!(resp.final_text().is_none());
        assert_eq!(synth.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_success_is_verbatim() {
        let synth = MockProvider::answering(ProviderKind::OpenAi, "merged");
        let registry = Arc::new(ProviderRegistry::new().with(Arc::new(synth.clone())));
        let aggregator = ResponseAggregator::new(registry, synthesis(ProviderKind::ALL.to_vec()));

        let text = "  AES-256 at rest, TLS 1.2+ in transit.\n";
        let resp = aggregator
            .aggregate(
                &requirement(),
                ProviderMode::Moa,
                &[
                    timed_out(ProviderKind::OpenAi),
                    ok(ProviderKind::DeepSeek, text),
                    timed_out(ProviderKind::Anthropic),
                ],
                Vec::new(),
            )
            .await;

        assert_eq!(resp.final_text(), Some(text));
        assert!(resp.error().is_none());
        assert_eq!(synth.calls(), 0);
        assert_eq!(resp.provider_text(ProviderKind::OpenAi), None);
    }

    #[tokio::test]
    async fn test_multiple_successes_synthesize() {
        let synth = MockProvider::answering(ProviderKind::OpenAi, "merged answer");
        let telemetry = TelemetryCollector::new();
        let registry = Arc::new(ProviderRegistry::new().with(Arc::new(synth.clone())));
        let aggregator = ResponseAggregator::new(registry, synthesis(ProviderKind::ALL.to_vec()))
            .with_telemetry(telemetry.clone());

        let resp = aggregator
            .aggregate(
                &requirement(),
                ProviderMode::Moa,
                &[
                    ok(ProviderKind::OpenAi, "draft one"),
                    ok(ProviderKind::Anthropic, "draft two"),
                ],
                Vec::new(),
            )
            .await;

        assert_eq!(resp.final_text(), Some("merged answer"));
        assert_eq!(
            resp.outcome,
            ResponseOutcome::Answered {
                text: "merged answer".into(),
                source: AnswerSource::Synthesized {
                    synthesizer: ProviderKind::OpenAi
                },
            }
        );
        assert_eq!(synth.calls(), 1);
        let prompt = &synth.prompts()[0];
        assert!(prompt.messages[0].content.contains("draft one"));
        assert!(prompt.messages[0].content.contains("draft two"));
        assert_eq!(telemetry.get_stats().syntheses, 1);
    }

    #[tokio::test]
    async fn test_synthesis_failure_uses_priority_order() {
        let synth = MockProvider::failing(
            ProviderKind::OpenAi,
            ProviderError::Unavailable("down".into()),
        );
        let registry = Arc::new(ProviderRegistry::new().with(Arc::new(synth)));
        let aggregator = ResponseAggregator::new(
            registry,
            synthesis(vec![ProviderKind::Anthropic, ProviderKind::DeepSeek]),
        );

        let resp = aggregator
            .aggregate(
                &requirement(),
                ProviderMode::Moa,
                &[
                    ok(ProviderKind::DeepSeek, "deepseek text"),
                    ok(ProviderKind::Anthropic, "anthropic text"),
                ],
                Vec::new(),
            )
            .await;

        assert_eq!(resp.final_text(), Some("anthropic text"));
        assert!(matches!(
            resp.error(),
            Some(AggregationError::SynthesisFailed { ref fallback, .. }) if fallback == "anthropic"
        ));
    }

    #[tokio::test]
    async fn test_missing_synthesizer_falls_back() {
        let aggregator = ResponseAggregator::new(
            Arc::new(ProviderRegistry::new()),
            synthesis(vec![ProviderKind::OpenAi]),
        );

        // Neither survivor is in the priority list: first arrival wins
        let outcome = aggregator
            .compose(
                &requirement(),
                &[
                    ok(ProviderKind::DeepSeek, "first"),
                    ok(ProviderKind::Anthropic, "second"),
                ],
                &[],
            )
            .await;

        match outcome {
            ResponseOutcome::Answered {
                text,
                source: AnswerSource::Fallback { provider, .. },
            } => {
                assert_eq!(text, "first");
                assert_eq!(provider, ProviderKind::DeepSeek);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_synthesis_timeout_falls_back() {
        let synth = MockProvider::hanging(ProviderKind::OpenAi);
        let registry = Arc::new(ProviderRegistry::new().with(Arc::new(synth)));
        let mut config = synthesis(ProviderKind::ALL.to_vec());
        config.timeout_secs = 1;
        let aggregator = ResponseAggregator::new(registry, config);

        let started = Instant::now();
        let outcome = aggregator
            .compose(
                &requirement(),
                &[
                    ok(ProviderKind::Anthropic, "anthropic"),
                    ok(ProviderKind::OpenAi, "openai"),
                ],
                &[],
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            outcome,
            ResponseOutcome::Answered { ref text, .. } if text == "openai"
        ));
    }

    #[tokio::test]
    async fn test_empty_text_counts_as_failure() {
        let aggregator = ResponseAggregator::new(
            Arc::new(ProviderRegistry::new()),
            synthesis(ProviderKind::ALL.to_vec()),
        );
        let outcome = aggregator
            .compose(&requirement(), &[ok(ProviderKind::OpenAi, "   ")], &[])
            .await;
        assert!(matches!(outcome, ResponseOutcome::Failed { .. }));
    }
}
