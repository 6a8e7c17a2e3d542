//! Batch orchestration
//!
//! - `state`: batch lifecycle state machine
//! - `progress`: per-scope progress record and snapshots
//! - `retry`: provider call retry policy
//! - `pipeline`: answer one requirement end to end
//! - `bulk`: run the pipeline over a batch with bounded concurrency

pub mod bulk;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod state;

pub use bulk::BulkOrchestrator;
pub use pipeline::GenerationPipeline;
pub use progress::{BatchSummary, BatchTicket, ProgressSnapshot, ProgressTracker, TaskOutcome};
pub use retry::RetryPolicy;
pub use state::{BatchEvent, BatchState};
