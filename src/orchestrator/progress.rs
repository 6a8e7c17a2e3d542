//! Batch progress tracking
//!
//! One mutex-guarded `BatchJob` per scope. Every mutation publishes a fresh
//! `ProgressSnapshot` on a watch channel while still holding the lock, so
//! subscribers observe counters in the order they changed.
//!
//! Progress is monotonic within a batch: `completed` only grows, by exactly
//! one per task, and a task can only complete once.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tracing::{debug, info};
use uuid::Uuid;

use super::state::{BatchEvent, BatchState};
use crate::errors::OrchestrationError;
use crate::telemetry::{TelemetryCollector, TelemetryEvent};
use crate::types::{ProviderMode, RequirementId};

/// Summaries kept for late `wait` callers
const SUMMARY_HISTORY: usize = 16;

/// How one requirement ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Persisted with final text
    Answered,
    /// Persisted with a failure marker
    Failed,
    /// Could not be persisted, or the task died
    Errored,
}

/// Identifies one started batch inside a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchTicket {
    pub batch_id: Uuid,
    epoch: u64,
}

/// Caller-visible progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub batch_id: Option<Uuid>,
    pub state: BatchState,
    pub total: usize,
    pub completed: usize,
    pub errored: usize,
    pub in_flight: usize,
    pub cancel_requested: bool,
    pub is_processing: bool,
    pub model: Option<ProviderMode>,
}

impl ProgressSnapshot {
    pub fn idle() -> Self {
        Self {
            batch_id: None,
            state: BatchState::Idle,
            total: 0,
            completed: 0,
            errored: 0,
            in_flight: 0,
            cancel_requested: false,
            is_processing: false,
            model: None,
        }
    }

    /// Completed fraction in [0, 1]; an empty batch counts as done
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Final accounting for a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub state: BatchState,
    pub total: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub answered: usize,
    pub failed: usize,
    pub errored: usize,
}

impl BatchSummary {
    /// Requirements never dispatched because of cancellation or abort
    pub fn skipped(&self) -> usize {
        self.total.saturating_sub(self.dispatched)
    }
}

#[derive(Debug)]
struct BatchJob {
    batch_id: Option<Uuid>,
    epoch: u64,
    state: BatchState,
    total: usize,
    dispatched: usize,
    completed: usize,
    answered: usize,
    failed: usize,
    errored: usize,
    in_flight: HashSet<RequirementId>,
    cancelled: bool,
    abnormal: bool,
    mode: Option<ProviderMode>,
}

impl BatchJob {
    fn idle(epoch: u64) -> Self {
        Self {
            batch_id: None,
            epoch,
            state: BatchState::Idle,
            total: 0,
            dispatched: 0,
            completed: 0,
            answered: 0,
            failed: 0,
            errored: 0,
            in_flight: HashSet::new(),
            cancelled: false,
            abnormal: false,
            mode: None,
        }
    }

    fn owns(&self, ticket: BatchTicket) -> bool {
        self.epoch == ticket.epoch && self.batch_id == Some(ticket.batch_id)
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            batch_id: self.batch_id,
            state: self.state,
            total: self.total,
            completed: self.completed,
            errored: self.errored,
            in_flight: self.in_flight.len(),
            cancel_requested: self.cancelled,
            is_processing: self.state.is_running(),
            model: self.mode,
        }
    }

    fn summary(&self, batch_id: Uuid) -> BatchSummary {
        BatchSummary {
            batch_id,
            state: self.state,
            total: self.total,
            dispatched: self.dispatched,
            completed: self.completed,
            answered: self.answered,
            failed: self.failed,
            errored: self.errored,
        }
    }
}

/// Shared progress record for one scope
#[derive(Debug)]
pub struct ProgressTracker {
    scope: String,
    job: Mutex<BatchJob>,
    snapshots: watch::Sender<ProgressSnapshot>,
    summaries: Mutex<VecDeque<BatchSummary>>,
    finished: Notify,
    telemetry: Option<TelemetryCollector>,
}

impl ProgressTracker {
    pub fn new(scope: impl Into<String>) -> Self {
        let (snapshots, _) = watch::channel(ProgressSnapshot::idle());
        Self {
            scope: scope.into(),
            job: Mutex::new(BatchJob::idle(0)),
            snapshots,
            summaries: Mutex::new(VecDeque::new()),
            finished: Notify::new(),
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn lock(&self) -> MutexGuard<'_, BatchJob> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, job: &BatchJob) {
        self.snapshots.send_replace(job.snapshot());
    }

    fn apply(&self, job: &mut BatchJob, event: BatchEvent) -> Result<(), OrchestrationError> {
        let from = job.state;
        job.state = from.transition(event)?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(TelemetryEvent::StateTransition {
                from,
                to: job.state,
                timestamp: Instant::now(),
            });
        }
        Ok(())
    }

    /// Open a new batch. Fails while another batch is running in this scope.
    pub fn begin(
        &self,
        total: usize,
        mode: ProviderMode,
    ) -> Result<BatchTicket, OrchestrationError> {
        let mut job = self.lock();
        if job.state.is_running() {
            return Err(OrchestrationError::AlreadyRunning {
                scope: self.scope.clone(),
            });
        }

        self.apply(&mut job, BatchEvent::Start)?;

        let ticket = BatchTicket {
            batch_id: Uuid::new_v4(),
            epoch: job.epoch + 1,
        };
        let state = job.state;
        *job = BatchJob::idle(ticket.epoch);
        job.state = state;
        job.batch_id = Some(ticket.batch_id);
        job.total = total;
        job.mode = Some(mode);

        info!(
            scope = %self.scope,
            batch_id = %ticket.batch_id,
            total,
            mode = %mode,
            "Batch started"
        );
        self.publish(&job);
        Ok(ticket)
    }

    /// Reserve an in-flight slot for `id`.
    ///
    /// Returns false once cancellation has been requested, when the ticket is
    /// stale, or when `id` is already in flight.
    pub fn try_dispatch(&self, ticket: BatchTicket, id: RequirementId) -> bool {
        let mut job = self.lock();
        if !job.owns(ticket) || !job.state.is_running() || job.cancelled {
            return false;
        }
        if job.dispatched >= job.total || !job.in_flight.insert(id) {
            return false;
        }
        job.dispatched += 1;
        self.publish(&job);
        true
    }

    /// Record the end of one task. Later calls for the same task are no-ops.
    pub fn finish_task(&self, ticket: BatchTicket, id: RequirementId, outcome: TaskOutcome) -> bool {
        let mut job = self.lock();
        if !job.owns(ticket) || !job.in_flight.remove(&id) {
            return false;
        }

        job.completed += 1;
        match outcome {
            TaskOutcome::Answered => job.answered += 1,
            TaskOutcome::Failed => job.failed += 1,
            TaskOutcome::Errored => job.errored += 1,
        }
        debug_assert!(job.completed <= job.total);

        debug!(
            batch_id = %ticket.batch_id,
            requirement_id = %id,
            completed = job.completed,
            total = job.total,
            outcome = ?outcome,
            "Task finished"
        );
        self.publish(&job);
        true
    }

    /// Stop further dispatch. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        let mut job = self.lock();
        if !job.state.is_running() || job.cancelled {
            return false;
        }
        job.cancelled = true;
        info!(
            scope = %self.scope,
            batch_id = ?job.batch_id,
            completed = job.completed,
            in_flight = job.in_flight.len(),
            "Cancellation requested"
        );
        self.publish(&job);
        true
    }

    pub fn is_cancelled(&self, ticket: BatchTicket) -> bool {
        let job = self.lock();
        job.owns(ticket) && job.cancelled
    }

    /// Flag the running batch as having terminated abnormally
    pub fn mark_abnormal(&self, ticket: BatchTicket) {
        let mut job = self.lock();
        if job.owns(ticket) && job.state.is_running() {
            job.abnormal = true;
        }
    }

    /// Move a drained batch to its terminal state and record its summary.
    ///
    /// Anything still marked in flight is counted as errored.
    pub fn finish_batch(&self, ticket: BatchTicket) -> Option<BatchSummary> {
        let summary = {
            let mut job = self.lock();
            if !job.owns(ticket) || !job.state.is_running() {
                return None;
            }

            let stragglers = job.in_flight.len();
            if stragglers > 0 {
                job.in_flight.clear();
                job.completed += stragglers;
                job.errored += stragglers;
                job.abnormal = true;
            }

            let event = if job.abnormal {
                BatchEvent::Abort
            } else if job.cancelled {
                BatchEvent::CancelDrained
            } else {
                BatchEvent::Drained
            };
            // Running accepts all three events
            self.apply(&mut job, event).ok()?;

            let summary = job.summary(ticket.batch_id);
            info!(
                scope = %self.scope,
                batch_id = %ticket.batch_id,
                state = %summary.state,
                completed = summary.completed,
                total = summary.total,
                errored = summary.errored,
                "Batch finished"
            );
            self.publish(&job);
            summary
        };

        {
            let mut summaries = self.summaries.lock().unwrap_or_else(PoisonError::into_inner);
            summaries.push_back(summary.clone());
            while summaries.len() > SUMMARY_HISTORY {
                summaries.pop_front();
            }
        }
        self.finished.notify_waiters();
        Some(summary)
    }

    /// Return to idle, but only if `ticket` still owns a terminal batch
    pub fn reset_if(&self, ticket: BatchTicket) -> bool {
        let mut job = self.lock();
        if !job.owns(ticket) || !job.state.is_terminal() {
            return false;
        }
        if self.apply(&mut job, BatchEvent::Reset).is_err() {
            return false;
        }
        let epoch = job.epoch;
        *job = BatchJob::idle(epoch);
        debug!(scope = %self.scope, batch_id = %ticket.batch_id, "Progress reset to idle");
        self.publish(&job);
        true
    }

    /// Terminate and reset in one step; used on abnormal exit paths
    pub fn abort(&self, ticket: BatchTicket) {
        self.mark_abnormal(ticket);
        self.finish_batch(ticket);
        self.reset_if(ticket);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshots.subscribe()
    }

    /// Summary of a finished batch, if still in history
    pub fn summary(&self, batch_id: Uuid) -> Option<BatchSummary> {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|s| s.batch_id == batch_id)
            .cloned()
    }

    /// Resolve once `batch_id` is terminal; `None` for batches this tracker
    /// never ran or has forgotten
    pub async fn wait(&self, batch_id: Uuid) -> Option<BatchSummary> {
        loop {
            let notified = self.finished.notified();

            if let Some(summary) = self.summary(batch_id) {
                return Some(summary);
            }
            let current = {
                let job = self.lock();
                job.batch_id == Some(batch_id) && job.state.is_running()
            };
            if !current {
                return None;
            }

            notified.await;
        }
    }
}
