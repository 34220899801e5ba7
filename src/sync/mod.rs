//! Pair reconciliation and run orchestration
//!
//! [`BucketReconciler`] handles one `SOURCE:DEST` pair; [`SyncOrchestrator`]
//! runs it over every configured pair, one after another or all at once.

mod orchestrator;
mod reconciler;

pub use orchestrator::SyncOrchestrator;
pub use reconciler::{compute_plan, BucketReconciler};
