//! Provider outputs and the durable aggregated result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::errors::{AggregationError, ProviderError};
use crate::types::provider::{ProviderKind, ProviderMode};
use crate::types::requirement::{Requirement, RequirementId};

/// Identifier of a persisted aggregated response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Uuid);

impl ResponseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResponseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One provider's raw output for a requirement
///
/// Lives only inside the generation task; the text (or `None`) is copied
/// into the aggregated record and the rest is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub provider: ProviderKind,
    pub outcome: Result<String, ProviderError>,
    pub latency_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl ProviderResponse {
    pub fn success(provider: ProviderKind, text: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            provider,
            outcome: Ok(text.into()),
            latency_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(provider: ProviderKind, error: ProviderError, latency_ms: u64) -> Self {
        Self {
            provider,
            outcome: Err(error),
            latency_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A historical requirement consulted while generating an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarMatch {
    /// Embedding record the match came from
    pub record_id: Uuid,
    pub requirement: String,
    pub response: String,
    pub category: String,
    /// Cosine similarity in [0, 1]
    pub score: f32,
    /// Human-facing label, e.g. "Response #1"
    pub reference: String,
}

/// Reviewer verdict on a generated answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

impl std::str::FromStr for Feedback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "up" | "+" => Ok(Feedback::Positive),
            "negative" | "down" | "-" => Ok(Feedback::Negative),
            other => Err(format!("Unknown feedback: {}", other)),
        }
    }
}

/// Where the final text of an answered requirement came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AnswerSource {
    /// Mixture-of-agents synthesis over several provider answers
    Synthesized { synthesizer: ProviderKind },
    /// Exactly one provider answered; its text is used verbatim
    SingleProvider { provider: ProviderKind },
    /// Synthesis failed; the highest-priority provider answer was used
    Fallback { provider: ProviderKind, reason: String },
}

/// Final text or an explicit failure marker. There is no third state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseOutcome {
    Answered { text: String, source: AnswerSource },
    Failed { error: AggregationError },
}

/// The durable result for one requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub id: ResponseId,
    pub requirement_id: RequirementId,
    pub category: String,
    pub requirement: String,
    pub mode: ProviderMode,

    /// Per-provider text; `None` when that provider failed
    pub provider_responses: BTreeMap<ProviderKind, Option<String>>,

    pub outcome: ResponseOutcome,

    /// Historical matches consulted during generation
    #[serde(default)]
    pub similar: Vec<SimilarMatch>,

    #[serde(default)]
    pub rating: Option<i32>,

    #[serde(default)]
    pub feedback: Option<Feedback>,

    pub created_at: DateTime<Utc>,
}

impl AggregatedResponse {
    /// Start a record for `requirement` from the raw provider outputs
    pub fn new(
        requirement: &Requirement,
        mode: ProviderMode,
        responses: &[ProviderResponse],
        similar: Vec<SimilarMatch>,
        outcome: ResponseOutcome,
    ) -> Self {
        let provider_responses = responses
            .iter()
            .map(|r| (r.provider, r.text().map(str::to_string)))
            .collect();

        Self {
            id: ResponseId::new(),
            requirement_id: requirement.id,
            category: requirement.category.clone(),
            requirement: requirement.text.clone(),
            mode,
            provider_responses,
            outcome,
            similar,
            rating: None,
            feedback: None,
            created_at: Utc::now(),
        }
    }

    /// Final answer text, if any provider work survived
    pub fn final_text(&self) -> Option<&str> {
        match &self.outcome {
            ResponseOutcome::Answered { text, .. } => Some(text),
            ResponseOutcome::Failed { .. } => None,
        }
    }

    /// Error recorded for this response. Fallback answers carry
    /// `SynthesisFailed` alongside their text.
    pub fn error(&self) -> Option<AggregationError> {
        match &self.outcome {
            ResponseOutcome::Failed { error } => Some(error.clone()),
            ResponseOutcome::Answered {
                source: AnswerSource::Fallback { provider, reason },
                ..
            } => Some(AggregationError::SynthesisFailed {
                fallback: provider.to_string(),
                reason: reason.clone(),
            }),
            ResponseOutcome::Answered { .. } => None,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Answered { .. })
    }

    /// Text returned by a specific provider
    pub fn provider_text(&self, provider: ProviderKind) -> Option<&str> {
        self.provider_responses
            .get(&provider)
            .and_then(|t| t.as_deref())
    }

    /// Attach reviewer metadata; absent values leave the field untouched
    pub fn apply_feedback(&mut self, rating: Option<i32>, feedback: Option<Feedback>) {
        if rating.is_some() {
            self.rating = rating;
        }
        if feedback.is_some() {
            self.feedback = feedback;
        }
    }
}
