//! Background Jobs for SchemaSync
//!
//! Tasks that run on a timer beside the change pipeline:
//!
//! - `cache_retention`: bounds snapshots, comparison history and processed
//!   pending changes, then compacts the store
//! - `reconciliation`: full comparison for subscriptions with unprocessed
//!   changes
//!
//! # Usage
//!
//! ```ignore
//! use schemasync_engine::jobs::{cache_retention_task, RetentionConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(cache_retention_task(Arc::clone(&store), RetentionConfig::default(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod cache_retention;
pub mod reconciliation;

pub use cache_retention::{
    cache_retention_task, run_retention_cycle, RetentionConfig, RetentionMetrics,
    RetentionReport, RetentionSnapshot,
};
pub use reconciliation::{
    reconciliation_task, run_reconciliation_cycle, ReconciliationConfig, ReconciliationMetrics,
    ReconciliationReport, ReconciliationSnapshot,
};
