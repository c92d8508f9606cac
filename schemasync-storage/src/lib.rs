//! SchemaSync Storage
//!
//! Async repository traits for subscriptions, snapshots, comparison history
//! and pending changes, plus an in-memory implementation.

mod memory;
mod repository;

pub use memory::InMemoryStore;
pub use repository::{
    ComparisonHistoryRepository, PendingChangeRepository, SnapshotRepository, StoreMaintenance,
    SubscriptionRepository, SyncStore,
};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
