//! Bulk generation orchestrator
//!
//! Runs the pipeline over a batch under a semaphore-bounded worker pool:
//! - at most `concurrency` requirements in flight
//! - cancellation stops dispatch; in-flight work drains naturally
//! - every dispatched task is joined before the batch turns terminal
//! - the terminal snapshot stays visible for a grace interval, then resets
//!
//! Reset runs on every exit path. Task panics are caught by a completion
//! guard; a driver that dies aborts and resets through its own guard.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::pipeline::GenerationPipeline;
use super::progress::{BatchSummary, BatchTicket, ProgressSnapshot, ProgressTracker, TaskOutcome};
use crate::config::BatchConfig;
use crate::errors::OrchestrationError;
use crate::telemetry::TelemetryEvent;
use crate::types::{ProviderMode, Requirement, RequirementId};

/// Single-flight batch runner for one scope
#[derive(Debug)]
pub struct BulkOrchestrator {
    pipeline: Arc<GenerationPipeline>,
    tracker: Arc<ProgressTracker>,
    settings: BatchConfig,
}

impl BulkOrchestrator {
    pub fn new(
        scope: impl Into<String>,
        pipeline: Arc<GenerationPipeline>,
        settings: BatchConfig,
    ) -> Self {
        let tracker = ProgressTracker::new(scope).with_telemetry(pipeline.telemetry().clone());
        Self {
            pipeline,
            tracker: Arc::new(tracker),
            settings,
        }
    }

    pub fn scope(&self) -> &str {
        self.tracker.scope()
    }

    /// Start a batch in the background.
    ///
    /// Must be called from within a tokio runtime. Duplicate requirement ids
    /// are dropped (first occurrence wins) before `total` is fixed.
    ///
    /// Rejections are checked in order: invalid concurrency, a batch already
    /// running in this scope, then no providers for `mode`.
    pub fn start(
        &self,
        requirements: Vec<Requirement>,
        concurrency: usize,
        mode: ProviderMode,
    ) -> Result<BatchTicket, OrchestrationError> {
        if concurrency == 0 || concurrency > self.settings.max_concurrency {
            return Err(OrchestrationError::InvalidConcurrencyLimit {
                requested: concurrency,
                max: self.settings.max_concurrency,
            });
        }

        if self.tracker.snapshot().is_processing {
            return Err(OrchestrationError::AlreadyRunning {
                scope: self.scope().to_string(),
            });
        }

        if self.pipeline.registry().for_mode(mode).is_empty() {
            return Err(OrchestrationError::NoProviders {
                mode: mode.to_string(),
            });
        }

        let requirements = dedup(requirements);
        let ticket = self.tracker.begin(requirements.len(), mode)?;

        let driver = BatchDriver {
            pipeline: Arc::clone(&self.pipeline),
            tracker: Arc::clone(&self.tracker),
            ticket,
            mode,
            concurrency,
            grace: self.settings.grace_period(),
        };
        tokio::spawn(driver.run(requirements));

        Ok(ticket)
    }

    /// Request cancellation of the running batch
    pub fn cancel(&self) -> bool {
        self.tracker.cancel()
    }

    /// Cancel only if `batch_id` is the running batch
    pub fn cancel_batch(&self, batch_id: Uuid) -> bool {
        if self.tracker.snapshot().batch_id != Some(batch_id) {
            debug!(scope = %self.scope(), batch_id = %batch_id, "Cancel for stale batch ignored");
            return false;
        }
        self.tracker.cancel()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tracker.subscribe()
    }

    /// Resolve with the batch summary once `batch_id` is terminal
    pub async fn wait(&self, batch_id: Uuid) -> Option<BatchSummary> {
        self.tracker.wait(batch_id).await
    }

    pub fn is_running(&self) -> bool {
        self.tracker.snapshot().is_processing
    }
}

fn dedup(requirements: Vec<Requirement>) -> Vec<Requirement> {
    let mut seen = HashSet::with_capacity(requirements.len());
    requirements
        .into_iter()
        .filter(|r| {
            let fresh = seen.insert(r.id);
            if !fresh {
                warn!(requirement_id = %r.id, "Duplicate requirement dropped from batch");
            }
            fresh
        })
        .collect()
}

struct BatchDriver {
    pipeline: Arc<GenerationPipeline>,
    tracker: Arc<ProgressTracker>,
    ticket: BatchTicket,
    mode: ProviderMode,
    concurrency: usize,
    grace: Duration,
}

impl BatchDriver {
    async fn run(self, requirements: Vec<Requirement>) {
        let guard = DriverGuard {
            tracker: Arc::clone(&self.tracker),
            ticket: self.ticket,
            armed: true,
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for requirement in requirements {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            if !self.tracker.try_dispatch(self.ticket, requirement.id) {
                debug!(
                    batch_id = %self.ticket.batch_id,
                    "Dispatch stopped; cancellation observed"
                );
                break;
            }

            let pipeline = Arc::clone(&self.pipeline);
            let tracker = Arc::clone(&self.tracker);
            let ticket = self.ticket;
            let mode = self.mode;

            tasks.spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let mut completion = CompletionGuard::new(tracker, ticket, requirement.id);

                let outcome = match pipeline.run(&requirement, mode).await {
                    Ok(response) if response.is_answered() => TaskOutcome::Answered,
                    Ok(_) => TaskOutcome::Failed,
                    Err(e) => {
                        error!(
                            requirement_id = %requirement.id,
                            error = %e,
                            "Failed to persist response"
                        );
                        TaskOutcome::Errored
                    }
                };

                pipeline.telemetry().record(TelemetryEvent::RequirementCompleted {
                    requirement_id: requirement.id,
                    outcome,
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: Instant::now(),
                });
                completion.finish(outcome);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(batch_id = %self.ticket.batch_id, error = %e, "Requirement task died");
                self.tracker.mark_abnormal(self.ticket);
            }
        }

        let summary = self.tracker.finish_batch(self.ticket);
        guard.disarm();

        if let Some(summary) = summary {
            info!(
                batch_id = %summary.batch_id,
                state = %summary.state,
                answered = summary.answered,
                failed = summary.failed,
                errored = summary.errored,
                skipped = summary.skipped(),
                "Batch drained"
            );
        }

        tokio::time::sleep(self.grace).await;
        self.tracker.reset_if(self.ticket);
    }
}

/// Records an errored completion if a task ends without reporting
struct CompletionGuard {
    tracker: Arc<ProgressTracker>,
    ticket: BatchTicket,
    id: RequirementId,
    done: bool,
}

impl CompletionGuard {
    fn new(tracker: Arc<ProgressTracker>, ticket: BatchTicket, id: RequirementId) -> Self {
        Self {
            tracker,
            ticket,
            id,
            done: false,
        }
    }

    fn finish(&mut self, outcome: TaskOutcome) {
        self.tracker.finish_task(self.ticket, self.id, outcome);
        self.done = true;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.done {
            self.tracker.mark_abnormal(self.ticket);
            self.tracker
                .finish_task(self.ticket, self.id, TaskOutcome::Errored);
        }
    }
}

/// Aborts and resets the batch if the driver exits without finishing
struct DriverGuard {
    tracker: Arc<ProgressTracker>,
    ticket: BatchTicket,
    armed: bool,
}

impl DriverGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!(batch_id = %self.ticket.batch_id, "Batch driver exited abnormally; resetting");
            self.tracker.abort(self.ticket);
        }
    }
}
