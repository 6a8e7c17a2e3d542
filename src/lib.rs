//! rfpbuddy - Bulk RFP response generation
//!
//! Answers batches of RFP requirements by fanning each one out to several
//! language-model providers, synthesizing their drafts into one answer, and
//! grounding prompts in similar, previously answered requirements.
//!
//! # Architecture
//!
//! - **providers**: one capability trait over OpenAI, Anthropic and DeepSeek
//! - **index**: in-process cosine-similarity index over embedded answers
//! - **aggregator**: mixture-of-agents composition with synthesis fallback
//! - **orchestrator**: per-requirement pipeline and the bulk batch runner
//! - **service**: per-scope facade used by the CLI and any API layer

pub mod errors;
pub mod types;

pub mod config;
pub mod telemetry;

pub mod embedding;
pub mod index;
pub mod providers;
pub mod storage;

pub mod aggregator;
pub mod orchestrator;
pub mod service;

pub mod cli;

/// Scripted collaborators for tests and offline runs
pub mod mocks;

// Re-export commonly used types
pub use config::Config;
pub use errors::{Result, RfpError};
pub use orchestrator::{BatchState, BatchSummary, BulkOrchestrator, ProgressSnapshot};
pub use service::{BatchHandle, RfpService};
pub use types::{AggregatedResponse, ProviderKind, ProviderMode, Requirement, RequirementId};
