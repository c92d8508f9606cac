//! Debouncer and processor wired together.

use crate::debouncer::{ChangeDebouncer, DebounceConfig, DebouncerMetrics, ShutdownMode};
use crate::orchestrator::ComparisonOrchestrator;
use crate::processor::{ChangeProcessor, ProcessorMetrics, ProcessorSnapshot};
use schemasync_core::{
    ChangeEvent, ChangeKind, ChangeSource, ConfigError, SqlObjectType, SubscriptionId,
};
use schemasync_storage::SyncStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What a pipeline did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Batches flushed out of the debouncer at shutdown
    pub flushed_batches: usize,
    pub processor: ProcessorSnapshot,
}

/// Running change pipeline: producers record changes, a background worker
/// processes the batches the debouncer emits.
pub struct ChangePipeline {
    debouncer: ChangeDebouncer,
    processor: Arc<ChangeProcessor>,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<Arc<ProcessorMetrics>>,
}

impl ChangePipeline {
    /// Build the debouncer and spawn the processor loop on the current
    /// runtime.
    pub fn start(
        config: DebounceConfig,
        store: Arc<dyn SyncStore>,
        orchestrator: Arc<dyn ComparisonOrchestrator>,
    ) -> Result<Self, ConfigError> {
        let (debouncer, batch_rx) = ChangeDebouncer::new(config)?;
        let processor = Arc::new(ChangeProcessor::new(store, orchestrator));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(Arc::clone(&processor).run(batch_rx, shutdown_rx));

        tracing::info!(
            quiet_period_ms = debouncer.config().quiet_period.as_millis() as u64,
            "Change pipeline started"
        );
        Ok(Self {
            debouncer,
            processor,
            shutdown_tx,
            worker,
        })
    }

    pub fn debouncer(&self) -> &ChangeDebouncer {
        &self.debouncer
    }

    pub fn record_change(
        &self,
        subscription_id: SubscriptionId,
        object_identifier: &str,
        source: ChangeSource,
        kind: ChangeKind,
        object_type: Option<SqlObjectType>,
    ) -> bool {
        self.debouncer
            .record_change(subscription_id, object_identifier, source, kind, object_type)
    }

    pub fn record_event(&self, event: ChangeEvent) -> bool {
        self.debouncer.record_event(event)
    }

    pub fn debouncer_metrics(&self) -> Arc<DebouncerMetrics> {
        self.debouncer.metrics()
    }

    pub fn processor_metrics(&self) -> Arc<ProcessorMetrics> {
        self.processor.metrics()
    }

    /// Stop the debouncer, let the processor drain every emitted batch, then
    /// join it.
    pub async fn shutdown(self, mode: ShutdownMode) -> PipelineReport {
        let flushed_batches = self.debouncer.shutdown(mode).await;
        let _ = self.shutdown_tx.send(true);

        let metrics = match self.worker.await {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::error!(error = %e, "Change processor task failed");
                self.processor.metrics()
            }
        };

        tracing::info!(mode = ?mode, flushed_batches, "Change pipeline stopped");
        PipelineReport {
            flushed_batches,
            processor: metrics.snapshot(),
        }
    }
}
