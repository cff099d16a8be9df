//! Reconciliation between the local queue and the remote feed service
//!
//! - `orchestrator`: drains queued mutations in batches on a timer or on demand
//! - `backoff`: non-authoritative retry hints
//! - `conflict`: local-vs-remote divergence detection and audit
//! - `engine`: composition root

mod backoff;
pub mod conflict;
mod engine;
mod orchestrator;

pub use backoff::{intended_backoff_ms, BackoffHint, BackoffHints};
pub use conflict::{ConflictDetector, ConflictSummary};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use orchestrator::{
    plan_batches, Batch, CycleOutcome, CycleReport, OrchestratorStatus, SyncOrchestrator,
};
