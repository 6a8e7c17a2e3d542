//! Telemetry system for rfpbuddy
//!
//! Two halves:
//! - `init_logging`: installs the tracing subscriber from `[logging]` config
//! - `TelemetryCollector`: in-process event log with aggregate statistics

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::errors::{Result, RfpError};
use crate::orchestrator::{BatchState, TaskOutcome};
use crate::types::{ProviderKind, RequirementId};

/// Events retained for `recent_events`; aggregate stats are unbounded
const EVENT_HISTORY: usize = 1024;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this twice
/// is an error rather than a panic.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let installed = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init()
    };

    installed.map_err(|e| RfpError::Config(format!("Failed to initialise logging: {}", e)))
}

/// Telemetry event types
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    ProviderCall {
        provider: ProviderKind,
        latency_ms: u64,
        /// Error label when the call failed
        error: Option<&'static str>,
        timestamp: Instant,
    },
    RetryAttempt {
        provider: ProviderKind,
        attempt: u32,
        timestamp: Instant,
    },
    Synthesis {
        synthesizer: ProviderKind,
        success: bool,
        timestamp: Instant,
    },
    RetrievalDegraded {
        requirement_id: RequirementId,
        reason: String,
        timestamp: Instant,
    },
    RequirementCompleted {
        requirement_id: RequirementId,
        outcome: TaskOutcome,
        duration_ms: u64,
        timestamp: Instant,
    },
    StateTransition {
        from: BatchState,
        to: BatchState,
        timestamp: Instant,
    },
}

/// Per-provider counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderStats {
    pub succeeded: usize,
    pub failed: usize,
    pub total_latency_ms: u64,
}

impl ProviderStats {
    pub fn calls(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn success_rate(&self) -> f64 {
        if self.calls() == 0 {
            1.0
        } else {
            self.succeeded as f64 / self.calls() as f64
        }
    }

    pub fn mean_latency_ms(&self) -> u64 {
        match self.calls() {
            0 => 0,
            n => self.total_latency_ms / n as u64,
        }
    }
}

/// Telemetry statistics
#[derive(Debug, Clone, Default)]
pub struct TelemetryStats {
    pub providers: BTreeMap<ProviderKind, ProviderStats>,
    pub retry_attempts: usize,
    pub syntheses: usize,
    pub synthesis_failures: usize,
    pub retrieval_degraded: usize,
    pub requirements_answered: usize,
    pub requirements_failed: usize,
    pub requirements_errored: usize,
    pub state_transitions: usize,
}

impl TelemetryStats {
    pub fn requirements_completed(&self) -> usize {
        self.requirements_answered + self.requirements_failed + self.requirements_errored
    }
}

/// Telemetry collector
#[derive(Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<VecDeque<TelemetryEvent>>>,
    capacity: usize,
    stats: Arc<Mutex<TelemetryStats>>,
    start_time: Instant,
}

impl std::fmt::Debug for TelemetryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCollector")
            .field("events", &self.event_count())
            .finish()
    }
}

impl TelemetryCollector {
    /// Create a new telemetry collector
    pub fn new() -> Self {
        Self::with_capacity(EVENT_HISTORY)
    }

    /// Collector keeping at most `capacity` events in its log
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(EVENT_HISTORY)))),
            capacity,
            stats: Arc::new(Mutex::new(TelemetryStats::default())),
            start_time: Instant::now(),
        }
    }

    /// Record an event
    pub fn record(&self, event: TelemetryEvent) {
        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            match &event {
                TelemetryEvent::ProviderCall {
                    provider,
                    latency_ms,
                    error,
                    ..
                } => {
                    let entry = stats.providers.entry(*provider).or_default();
                    if error.is_none() {
                        entry.succeeded += 1;
                    } else {
                        entry.failed += 1;
                    }
                    entry.total_latency_ms += latency_ms;
                }
                TelemetryEvent::RetryAttempt { .. } => {
                    stats.retry_attempts += 1;
                }
                TelemetryEvent::Synthesis { success, .. } => {
                    stats.syntheses += 1;
                    if !success {
                        stats.synthesis_failures += 1;
                    }
                }
                TelemetryEvent::RetrievalDegraded { .. } => {
                    stats.retrieval_degraded += 1;
                }
                TelemetryEvent::RequirementCompleted { outcome, .. } => match outcome {
                    TaskOutcome::Answered => stats.requirements_answered += 1,
                    TaskOutcome::Failed => stats.requirements_failed += 1,
                    TaskOutcome::Errored => stats.requirements_errored += 1,
                },
                TelemetryEvent::StateTransition { .. } => {
                    stats.state_transitions += 1;
                }
            }
        }

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Get current statistics
    pub fn get_stats(&self) -> TelemetryStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Get recent events (last n)
    pub fn recent_events(&self, n: usize) -> Vec<TelemetryEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let start = events.len().saturating_sub(n);
        events.iter().skip(start).cloned().collect()
    }

    /// Success rate across every provider call
    pub fn provider_success_rate(&self) -> f64 {
        let stats = self.get_stats();
        let (ok, total) = stats
            .providers
            .values()
            .fold((0, 0), |(ok, total), p| (ok + p.succeeded, total + p.calls()));
        if total == 0 {
            1.0
        } else {
            ok as f64 / total as f64
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(provider: ProviderKind, error: Option<&'static str>) -> TelemetryEvent {
        TelemetryEvent::ProviderCall {
            provider,
            latency_ms: 100,
            error,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_provider_stats() {
        let telemetry = TelemetryCollector::new();
        telemetry.record(call(ProviderKind::OpenAi, None));
        telemetry.record(call(ProviderKind::OpenAi, Some("timeout")));
        telemetry.record(call(ProviderKind::Anthropic, None));

        let stats = telemetry.get_stats();
        let openai = &stats.providers[&ProviderKind::OpenAi];
        assert_eq!(openai.succeeded, 1);
        assert_eq!(openai.failed, 1);
        assert_eq!(openai.mean_latency_ms(), 100);
        assert!((openai.success_rate() - 0.5).abs() < f64::EPSILON);
        assert!((telemetry.provider_success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_requirement_outcomes() {
        let telemetry = TelemetryCollector::new();
        for outcome in [TaskOutcome::Answered, TaskOutcome::Failed, TaskOutcome::Errored] {
            telemetry.record(TelemetryEvent::RequirementCompleted {
                requirement_id: RequirementId(1),
                outcome,
                duration_ms: 10,
                timestamp: Instant::now(),
            });
        }
        let stats = telemetry.get_stats();
        assert_eq!(stats.requirements_completed(), 3);
        assert_eq!(stats.requirements_errored, 1);
    }

    #[test]
    fn test_recent_events() {
        let telemetry = TelemetryCollector::new();
        for _ in 0..5 {
            telemetry.record(TelemetryEvent::Synthesis {
                synthesizer: ProviderKind::OpenAi,
                success: false,
                timestamp: Instant::now(),
            });
        }
        assert_eq!(telemetry.event_count(), 5);
        assert_eq!(telemetry.recent_events(2).len(), 2);
        assert_eq!(telemetry.get_stats().synthesis_failures, 5);
    }

    #[test]
    fn test_event_log_is_bounded() {
        let telemetry = TelemetryCollector::with_capacity(3);
        for attempt in 1..=10 {
            telemetry.record(TelemetryEvent::RetryAttempt {
                provider: ProviderKind::DeepSeek,
                attempt,
                timestamp: Instant::now(),
            });
        }
        assert_eq!(telemetry.event_count(), 3);
        assert_eq!(telemetry.get_stats().retry_attempts, 10);

        let attempts: Vec<u32> = telemetry
            .recent_events(5)
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::RetryAttempt { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![8, 9, 10]);
    }

    #[test]
    fn test_empty_success_rate() {
        assert_eq!(TelemetryCollector::new().provider_success_rate(), 1.0);
    }
}
