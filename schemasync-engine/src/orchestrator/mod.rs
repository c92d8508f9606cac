//! Comparison Orchestrator
//!
//! The single authority on whether a comparison may start for a
//! subscription. At most one comparison runs per subscription; a caller that
//! loses the race gets [`ComparisonOutcome::AlreadyRunning`] immediately and
//! is expected to leave its work to reconciliation.

mod engine;
mod lock;
mod source;

pub use engine::{OrchestratorConfig, SchemaComparisonOrchestrator};
pub use lock::{ComparisonLease, ComparisonLockRegistry, LeaseRecord};
pub use source::{DefinitionHashDiffer, SchemaDiffer, SchemaSource};

use async_trait::async_trait;
use schemasync_core::{ComparisonResult, ObjectIdentifier, SubscriptionId, SyncResult};

/// How a comparison request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonOutcome {
    /// The run finished and its result was persisted.
    Completed(Box<ComparisonResult>),
    /// Another comparison holds the subscription's lock.
    AlreadyRunning,
    /// The request was refused before starting (unknown or inactive
    /// subscription, nothing to compare). No result was persisted.
    Rejected { reason: String },
    /// The run failed; an `Error` result was persisted.
    Failed { reason: String },
    /// The run was cancelled; no result was persisted.
    Cancelled,
}

impl ComparisonOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ComparisonOutcome::Completed(_))
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, ComparisonOutcome::AlreadyRunning)
    }

    pub fn result(&self) -> Option<&ComparisonResult> {
        match self {
            ComparisonOutcome::Completed(result) => Some(result.as_ref()),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ComparisonOutcome::Completed(_) => "completed",
            ComparisonOutcome::AlreadyRunning => "already_running",
            ComparisonOutcome::Rejected { .. } => "rejected",
            ComparisonOutcome::Failed { .. } => "failed",
            ComparisonOutcome::Cancelled => "cancelled",
        }
    }
}

#[async_trait]
pub trait ComparisonOrchestrator: Send + Sync {
    /// Compare the whole supported object set.
    ///
    /// `full_comparison` forces a fresh database capture. Otherwise the most
    /// recent cached snapshot is reused when the database has not changed
    /// since it was captured.
    async fn run_comparison(
        &self,
        subscription_id: SubscriptionId,
        full_comparison: bool,
        trigger: &str,
    ) -> ComparisonOutcome;

    /// Compare only the named objects, refreshing just their entries in the
    /// cached snapshot.
    async fn compare_objects(
        &self,
        subscription_id: SubscriptionId,
        objects: &[ObjectIdentifier],
        trigger: &str,
    ) -> ComparisonOutcome;

    /// Return subscriptions left in `Comparing` with no live run to `Active`.
    ///
    /// The lock is not persisted, so a `Comparing` state whose lock is free
    /// was left behind by a run that never finished. Returns how many were
    /// reset.
    async fn recover_stale_states(&self) -> SyncResult<usize>;
}
