//! Conflict detection between local and remote article state
//!
//! Provides:
//! - Read/starred divergence classification
//! - Configurable resolution policy (remote wins by default)
//! - Append-only audit trail per sync session

mod detector;

pub use detector::{
    has_local_changes, states_differ, ConflictDetector, ConflictSummary, HIGH_CONFLICT_THRESHOLD,
};
