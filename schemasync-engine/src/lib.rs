//! SchemaSync Engine - Change Detection to Comparison
//!
//! Turns raw schema change notifications into lock-serialized comparison
//! runs between a SQL Server database and its SQL project:
//!
//! - `debouncer`: per-subscription sliding-window aggregation of changes
//! - `processor`: persists batches and decides which comparison to run
//! - `orchestrator`: the per-subscription lock and the comparison runs
//! - `jobs`: cache retention and reconciliation background tasks
//! - `pipeline`: debouncer and processor wired together

pub mod config;
pub mod constants;
pub mod debouncer;
pub mod events;
pub mod jobs;
pub mod orchestrator;
pub mod pipeline;
pub mod processor;
pub mod telemetry;

// Re-export commonly used types
pub use config::SyncConfig;
pub use debouncer::{
    ChangeDebouncer, DebounceConfig, DebouncerMetrics, DebouncerSnapshot, ShutdownMode,
};
pub use events::{BroadcastNotifier, ComparisonEvent, ComparisonNotifier, NoopNotifier};
pub use jobs::{
    cache_retention_task, reconciliation_task, ReconciliationConfig, RetentionConfig,
};
pub use orchestrator::{
    ComparisonLease, ComparisonLockRegistry, ComparisonOrchestrator, ComparisonOutcome,
    DefinitionHashDiffer, OrchestratorConfig, SchemaComparisonOrchestrator, SchemaDiffer,
    SchemaSource,
};
pub use pipeline::{ChangePipeline, PipelineReport};
pub use processor::{BatchOutcome, ChangeProcessor, ProcessorMetrics, ProcessorSnapshot};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
