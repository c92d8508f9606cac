//! Change Debouncer
//!
//! Absorbs bursts of change notifications into one batch per subscription.
//! Each subscription owns an independent sliding window: every new event
//! pushes the window's deadline out by the quiet period, and the batch is
//! emitted only once the subscription has been quiet for that long.
//!
//! # Concurrency
//!
//! Windows live in a `DashMap` keyed by subscription, each behind its own
//! mutex, so producers for unrelated subscriptions never contend. One timer
//! task per open window waits for the quiet period and emits the batch on a
//! bounded channel.
//!
//! A window is closed exactly once, under its mutex, either by its timer or
//! by shutdown. A producer that finds a closed window drops the stale map
//! entry and opens a fresh window, so no event is lost to that race.
//!
//! Timers pass through an emit gate before taking a batch. Shutdown closes
//! the gate after waiting for in-flight emissions, so no batch is delivered
//! once `shutdown` returns.

use crate::constants::{DEFAULT_DEBOUNCE_CHANNEL_CAPACITY, DEFAULT_DEBOUNCE_QUIET_MS};
use chrono::Utc;
use dashmap::DashMap;
use schemasync_core::{
    ChangeEvent, ChangeKind, ChangeSource, ConfigError, ObjectIdentifier, PendingChangeBatch,
    SqlObjectType, SubscriptionId, Timestamp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, RwLock};
use tokio::task::AbortHandle;
use tokio::time::Instant;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the change debouncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Quiet period after the last event before a batch is emitted
    /// (default: 500ms)
    pub quiet_period: Duration,

    /// Capacity of the ready-batch channel (default: 256)
    pub channel_capacity: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(DEFAULT_DEBOUNCE_QUIET_MS),
            channel_capacity: DEFAULT_DEBOUNCE_CHANNEL_CAPACITY,
        }
    }
}

impl DebounceConfig {
    /// Create DebounceConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `SCHEMASYNC_DEBOUNCE_QUIET_MS`: Quiet period in milliseconds (default: 500)
    /// - `SCHEMASYNC_DEBOUNCE_CHANNEL_CAPACITY`: Ready-batch channel capacity (default: 256)
    pub fn from_env() -> Self {
        let quiet_period = Duration::from_millis(
            std::env::var("SCHEMASYNC_DEBOUNCE_QUIET_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DEBOUNCE_QUIET_MS),
        );

        let channel_capacity = std::env::var("SCHEMASYNC_DEBOUNCE_CHANNEL_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DEBOUNCE_CHANNEL_CAPACITY);

        Self {
            quiet_period,
            channel_capacity,
        }
    }

    /// Short quiet period for local development.
    pub fn development() -> Self {
        Self {
            quiet_period: Duration::from_millis(100),
            channel_capacity: 32,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quiet_period.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "debounce.quiet_period".to_string(),
                value: format!("{:?}", self.quiet_period),
                reason: "quiet period must be greater than zero".to_string(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "debounce.channel_capacity".to_string(),
                value: "0".to_string(),
                reason: "channel capacity must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// What to do with pending windows when the debouncer stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Emit every non-empty pending window immediately
    Flush,
    /// Drop pending windows without emitting
    Discard,
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct DebouncerMetrics {
    /// Events accepted by `record_change`
    pub changes_recorded: AtomicU64,

    /// Events merged into an entry already pending for the same object
    pub changes_coalesced: AtomicU64,

    /// Events refused because the debouncer was stopped
    pub changes_rejected: AtomicU64,

    /// Pending events dropped by a discarding shutdown
    pub changes_discarded: AtomicU64,

    /// Batches delivered to the channel
    pub batches_emitted: AtomicU64,

    /// Batches lost because the receiver was gone
    pub batches_dropped: AtomicU64,

    /// Windows that closed with nothing in them
    pub empty_batches_skipped: AtomicU64,
}

impl DebouncerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DebouncerSnapshot {
        DebouncerSnapshot {
            changes_recorded: self.changes_recorded.load(Ordering::Relaxed),
            changes_coalesced: self.changes_coalesced.load(Ordering::Relaxed),
            changes_rejected: self.changes_rejected.load(Ordering::Relaxed),
            changes_discarded: self.changes_discarded.load(Ordering::Relaxed),
            batches_emitted: self.batches_emitted.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            empty_batches_skipped: self.empty_batches_skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebouncerSnapshot {
    pub changes_recorded: u64,
    pub changes_coalesced: u64,
    pub changes_rejected: u64,
    pub changes_discarded: u64,
    pub batches_emitted: u64,
    pub batches_dropped: u64,
    pub empty_batches_skipped: u64,
}

// ============================================================================
// PENDING WINDOW
// ============================================================================

/// Identity used to merge repeated observations of one object.
///
/// Database names are parsed so `[dbo].[Foo]` and `dbo.foo` collapse; file
/// identifiers are paths and only trimmed and lower-cased. The source is part
/// of the key so a batch keeps both sides' observations.
type DedupKey = (ChangeSource, String);

fn dedup_key(event: &ChangeEvent) -> DedupKey {
    let name = match event.source {
        ChangeSource::Database => {
            ObjectIdentifier::parse(&event.object_identifier, SqlObjectType::Unknown)
                .map(|id| {
                    format!(
                        "{}.{}",
                        id.schema_name.to_ascii_lowercase(),
                        id.object_name.to_ascii_lowercase()
                    )
                })
                .unwrap_or_else(|_| event.object_identifier.trim().to_ascii_lowercase())
        }
        ChangeSource::FileSystem => event.object_identifier.trim().to_ascii_lowercase(),
    };
    (event.source, name)
}

#[derive(Debug)]
struct PendingWindow {
    started_at: Timestamp,
    deadline: Instant,
    changes: Vec<ChangeEvent>,
    positions: HashMap<DedupKey, usize>,
    closed: bool,
    timer: Option<AbortHandle>,
}

impl PendingWindow {
    fn new(deadline: Instant) -> Self {
        Self {
            started_at: Utc::now(),
            deadline,
            changes: Vec::new(),
            positions: HashMap::new(),
            closed: false,
            timer: None,
        }
    }

    /// Add an event, merging with a pending entry for the same object.
    /// Returns `true` when the event was merged.
    fn absorb(&mut self, event: ChangeEvent) -> bool {
        let key = dedup_key(&event);
        match self.positions.get(&key) {
            Some(&index) => {
                let existing = &mut self.changes[index];
                existing.kind = existing.kind.coalesce(event.kind);
                existing.detected_at = event.detected_at;
                existing.object_identifier = event.object_identifier;
                if event.object_type.is_some() {
                    existing.object_type = event.object_type;
                }
                true
            }
            None => {
                self.positions.insert(key, self.changes.len());
                self.changes.push(event);
                false
            }
        }
    }

    /// Close the window and hand out its contents.
    fn close(&mut self, subscription_id: SubscriptionId) -> PendingChangeBatch {
        self.closed = true;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.positions.clear();
        PendingChangeBatch {
            subscription_id,
            changes: std::mem::take(&mut self.changes),
            batch_started_at: self.started_at,
            batch_completed_at: Utc::now(),
        }
    }
}

type SharedWindow = Arc<Mutex<PendingWindow>>;

fn lock_window(window: &SharedWindow) -> MutexGuard<'_, PendingWindow> {
    // Window state is a plain buffer; a panicking holder cannot leave it torn.
    window.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// DEBOUNCER
// ============================================================================

struct DebouncerInner {
    config: DebounceConfig,
    runtime: Handle,
    windows: DashMap<SubscriptionId, SharedWindow>,
    batch_tx: mpsc::Sender<PendingChangeBatch>,
    stopped: AtomicBool,
    emit_gate: RwLock<()>,
    metrics: Arc<DebouncerMetrics>,
}

/// Per-subscription sliding-window debouncer.
///
/// Cloning yields another handle to the same debouncer.
#[derive(Clone)]
pub struct ChangeDebouncer {
    inner: Arc<DebouncerInner>,
}

impl ChangeDebouncer {
    /// Create a debouncer and the receiver its batches are delivered on.
    ///
    /// Must be called from within a tokio runtime; window timers are spawned
    /// on it.
    pub fn new(
        config: DebounceConfig,
    ) -> Result<(Self, mpsc::Receiver<PendingChangeBatch>), ConfigError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| ConfigError::InitFailed {
            component: "change debouncer".to_string(),
            reason: e.to_string(),
        })?;

        let (batch_tx, batch_rx) = mpsc::channel(config.channel_capacity);
        let debouncer = Self {
            inner: Arc::new(DebouncerInner {
                config,
                runtime,
                windows: DashMap::new(),
                batch_tx,
                stopped: AtomicBool::new(false),
                emit_gate: RwLock::new(()),
                metrics: Arc::new(DebouncerMetrics::new()),
            }),
        };
        Ok((debouncer, batch_rx))
    }

    pub fn metrics(&self) -> Arc<DebouncerMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.inner.config
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Register a change. Returns immediately.
    ///
    /// Returns `false` if the debouncer has been stopped and the change was
    /// refused.
    pub fn record_change(
        &self,
        subscription_id: SubscriptionId,
        object_identifier: impl Into<String>,
        source: ChangeSource,
        kind: ChangeKind,
        object_type: Option<SqlObjectType>,
    ) -> bool {
        self.record_event(ChangeEvent::new(
            subscription_id,
            object_identifier,
            source,
            kind,
            object_type,
        ))
    }

    /// Register an already built change event.
    pub fn record_event(&self, event: ChangeEvent) -> bool {
        let subscription_id = event.subscription_id;
        let metrics = &self.inner.metrics;

        loop {
            if self.is_stopped() {
                metrics.changes_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    subscription_id = %subscription_id,
                    object = %event.object_identifier,
                    "Debouncer stopped, change refused"
                );
                return false;
            }

            let window = self.window_for(subscription_id);
            let mut guard = lock_window(&window);
            if guard.closed {
                drop(guard);
                self.inner
                    .windows
                    .remove_if(&subscription_id, |_, current| Arc::ptr_eq(current, &window));
                continue;
            }
            if self.is_stopped() {
                // An empty window here was opened after shutdown swept the map.
                if guard.changes.is_empty() {
                    guard.close(subscription_id);
                    drop(guard);
                    self.inner
                        .windows
                        .remove_if(&subscription_id, |_, current| Arc::ptr_eq(current, &window));
                }
                continue;
            }

            guard.deadline = Instant::now() + self.inner.config.quiet_period;
            tracing::trace!(
                subscription_id = %subscription_id,
                object = %event.object_identifier,
                source = %event.source,
                kind = %event.kind,
                "Change recorded"
            );
            if guard.absorb(event) {
                metrics.changes_coalesced.fetch_add(1, Ordering::Relaxed);
            }
            metrics.changes_recorded.fetch_add(1, Ordering::Relaxed);
            return true;
        }
    }

    /// Current window for a subscription, opening one if none is pending.
    fn window_for(&self, subscription_id: SubscriptionId) -> SharedWindow {
        let entry = self.inner.windows.entry(subscription_id).or_insert_with(|| {
            let deadline = Instant::now() + self.inner.config.quiet_period;
            let window = Arc::new(Mutex::new(PendingWindow::new(deadline)));
            let task = self.inner.runtime.spawn(run_window_timer(
                Arc::clone(&self.inner),
                subscription_id,
                Arc::clone(&window),
            ));
            lock_window(&window).timer = Some(task.abort_handle());
            window
        });
        Arc::clone(entry.value())
    }

    /// Subscriptions with an open window.
    pub fn pending_subscriptions(&self) -> usize {
        self.inner.windows.len()
    }

    /// Number of distinct objects pending for a subscription.
    pub fn pending_changes(&self, subscription_id: SubscriptionId) -> usize {
        self.inner
            .windows
            .get(&subscription_id)
            .map(|entry| lock_window(entry.value()).changes.len())
            .unwrap_or(0)
    }

    /// Stop accepting changes and close every pending window.
    ///
    /// After this returns no further batch is emitted. Returns the number of
    /// batches flushed.
    pub async fn shutdown(&self, mode: ShutdownMode) -> usize {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return 0;
        }
        // Waits for timers already emitting; later timers observe `stopped`.
        let _gate = self.inner.emit_gate.write().await;

        let subscriptions: Vec<SubscriptionId> =
            self.inner.windows.iter().map(|entry| *entry.key()).collect();

        let mut pending = Vec::new();
        for subscription_id in subscriptions {
            if let Some((_, window)) = self.inner.windows.remove(&subscription_id) {
                let mut guard = lock_window(&window);
                if guard.closed {
                    continue;
                }
                pending.push(guard.close(subscription_id));
            }
        }

        let mut flushed = 0;
        for batch in pending {
            match mode {
                ShutdownMode::Flush => {
                    if self.inner.emit(batch).await {
                        flushed += 1;
                    }
                }
                ShutdownMode::Discard => {
                    self.inner
                        .metrics
                        .changes_discarded
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                }
            }
        }

        tracing::info!(mode = ?mode, flushed, "Change debouncer stopped");
        flushed
    }
}

impl DebouncerInner {
    /// Deliver a batch. Empty batches are never sent.
    async fn emit(&self, batch: PendingChangeBatch) -> bool {
        if batch.is_empty() {
            self.metrics
                .empty_batches_skipped
                .fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                subscription_id = %batch.subscription_id,
                "Debounce window closed empty"
            );
            return false;
        }

        let subscription_id = batch.subscription_id;
        let changes = batch.len();
        match self.batch_tx.send(batch).await {
            Ok(()) => {
                self.metrics.batches_emitted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(subscription_id = %subscription_id, changes, "Batch ready");
                true
            }
            Err(_) => {
                self.metrics.batches_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    subscription_id = %subscription_id,
                    changes,
                    "Batch receiver closed, batch dropped"
                );
                false
            }
        }
    }
}

/// Wait out a window's quiet period and emit its batch.
async fn run_window_timer(
    inner: Arc<DebouncerInner>,
    subscription_id: SubscriptionId,
    window: SharedWindow,
) {
    loop {
        let deadline = {
            let guard = lock_window(&window);
            if guard.closed {
                return;
            }
            guard.deadline
        };
        tokio::time::sleep_until(deadline).await;

        let _gate = inner.emit_gate.read().await;
        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }

        let batch = {
            let mut guard = lock_window(&window);
            if guard.closed {
                return;
            }
            if guard.deadline > Instant::now() {
                // Slid by a newer event.
                continue;
            }
            // Clear our own handle first so closing does not abort this task.
            guard.timer = None;
            guard.close(subscription_id)
        };
        inner
            .windows
            .remove_if(&subscription_id, |_, current| Arc::ptr_eq(current, &window));

        inner.emit(batch).await;
        return;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config(quiet_ms: u64) -> DebounceConfig {
        DebounceConfig {
            quiet_period: Duration::from_millis(quiet_ms),
            channel_capacity: 16,
        }
    }

    #[test]
    fn test_config_default() {
        let config = DebounceConfig::default();
        assert_eq!(
            config.quiet_period,
            Duration::from_millis(DEFAULT_DEBOUNCE_QUIET_MS)
        );
        assert_eq!(config.channel_capacity, DEFAULT_DEBOUNCE_CHANNEL_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_quiet_period() {
        let config = DebounceConfig {
            quiet_period: Duration::ZERO,
            ..DebounceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        assert!(matches!(
            ChangeDebouncer::new(DebounceConfig::default()),
            Err(ConfigError::InitFailed { .. })
        ));
    }

    #[test]
    fn test_dedup_key_normalizes_database_names() {
        let sub = Uuid::now_v7();
        let a = ChangeEvent::new(
            sub,
            "[dbo].[Foo]",
            ChangeSource::Database,
            ChangeKind::Modified,
            None,
        );
        let b = ChangeEvent::new(sub, "DBO.foo", ChangeSource::Database, ChangeKind::Modified, None);
        let c = ChangeEvent::new(sub, "Foo", ChangeSource::Database, ChangeKind::Modified, None);
        assert_eq!(dedup_key(&a), dedup_key(&b));
        assert_eq!(dedup_key(&a), dedup_key(&c));

        let file = ChangeEvent::new(
            sub,
            "dbo.Foo",
            ChangeSource::FileSystem,
            ChangeKind::Modified,
            None,
        );
        assert_ne!(dedup_key(&a), dedup_key(&file));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_changes_coalesce_into_one_entry() {
        let (debouncer, mut rx) = ChangeDebouncer::new(config(500)).expect("debouncer");
        let sub = Uuid::now_v7();

        debouncer.record_change(
            sub,
            "dbo.Foo",
            ChangeSource::Database,
            ChangeKind::Created,
            None,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        debouncer.record_change(
            sub,
            "dbo.Foo",
            ChangeSource::Database,
            ChangeKind::Deleted,
            Some(SqlObjectType::StoredProcedure),
        );

        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.changes[0].kind, ChangeKind::Deleted);
        assert_eq!(
            batch.changes[0].object_type,
            Some(SqlObjectType::StoredProcedure)
        );

        let snapshot = debouncer.metrics().snapshot();
        assert_eq!(snapshot.changes_recorded, 2);
        assert_eq!(snapshot.changes_coalesced, 1);
        assert_eq!(snapshot.batches_emitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_then_create_becomes_modified() {
        let (debouncer, mut rx) = ChangeDebouncer::new(config(500)).expect("debouncer");
        let sub = Uuid::now_v7();

        debouncer.record_change(sub, "dbo.Foo", ChangeSource::Database, ChangeKind::Deleted, None);
        debouncer.record_change(sub, "dbo.Foo", ChangeSource::Database, ChangeKind::Created, None);

        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.changes[0].kind, ChangeKind::Modified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_on_new_events() {
        let (debouncer, mut rx) = ChangeDebouncer::new(config(500)).expect("debouncer");
        let sub = Uuid::now_v7();
        let started = Instant::now();

        for name in ["dbo.A", "dbo.B", "dbo.C"] {
            debouncer.record_change(sub, name, ChangeSource::Database, ChangeKind::Modified, None);
            tokio::time::sleep(Duration::from_millis(400)).await;
            assert!(rx.try_recv().is_err(), "emitted before quiet period");
        }

        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.len(), 3);
        let names: Vec<_> = batch
            .changes
            .iter()
            .map(|c| c.object_identifier.as_str())
            .collect();
        assert_eq!(names, vec!["dbo.A", "dbo.B", "dbo.C"]);
        assert!(started.elapsed() >= Duration::from_millis(1300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_are_isolated_per_subscription() {
        let (debouncer, mut rx) = ChangeDebouncer::new(config(500)).expect("debouncer");
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        debouncer.record_change(a, "dbo.Foo", ChangeSource::Database, ChangeKind::Modified, None);
        tokio::time::sleep(Duration::from_millis(300)).await;
        debouncer.record_change(b, "dbo.Bar", ChangeSource::Database, ChangeKind::Modified, None);
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Activity on B must not delay A.
        debouncer.record_change(b, "dbo.Baz", ChangeSource::Database, ChangeKind::Modified, None);

        let first = rx.recv().await.expect("first batch");
        assert_eq!(first.subscription_id, a);
        assert_eq!(first.len(), 1);

        let second = rx.recv().await.expect("second batch");
        assert_eq!(second.subscription_id, b);
        assert_eq!(second.len(), 2);
        assert!(second.changes.iter().all(|c| c.subscription_id == b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_after_emission_open_a_new_window() {
        let (debouncer, mut rx) = ChangeDebouncer::new(config(100)).expect("debouncer");
        let sub = Uuid::now_v7();

        debouncer.record_change(sub, "dbo.Foo", ChangeSource::Database, ChangeKind::Modified, None);
        let first = rx.recv().await.expect("first");
        assert_eq!(first.len(), 1);
        assert_eq!(debouncer.pending_subscriptions(), 0);

        debouncer.record_change(sub, "dbo.Foo", ChangeSource::Database, ChangeKind::Deleted, None);
        let second = rx.recv().await.expect("second");
        assert_eq!(second.len(), 1);
        assert_eq!(second.changes[0].kind, ChangeKind::Deleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discard_emits_nothing() {
        let (debouncer, mut rx) = ChangeDebouncer::new(config(500)).expect("debouncer");
        let sub = Uuid::now_v7();
        debouncer.record_change(sub, "dbo.Foo", ChangeSource::Database, ChangeKind::Modified, None);

        assert_eq!(debouncer.shutdown(ShutdownMode::Discard).await, 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        assert!(!debouncer.record_change(
            sub,
            "dbo.Bar",
            ChangeSource::Database,
            ChangeKind::Modified,
            None
        ));
        let snapshot = debouncer.metrics().snapshot();
        assert_eq!(snapshot.changes_discarded, 1);
        assert_eq!(snapshot.changes_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flush_emits_pending_once() {
        let (debouncer, mut rx) = ChangeDebouncer::new(config(500)).expect("debouncer");
        let sub = Uuid::now_v7();
        debouncer.record_change(sub, "dbo.Foo", ChangeSource::Database, ChangeKind::Modified, None);

        assert_eq!(debouncer.shutdown(ShutdownMode::Flush).await, 1);
        let batch = rx.try_recv().expect("flushed batch");
        assert_eq!(batch.len(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err(), "timer fired after shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let (debouncer, _rx) = ChangeDebouncer::new(config(500)).expect("debouncer");
        assert_eq!(debouncer.shutdown(ShutdownMode::Flush).await, 0);
        assert_eq!(debouncer.shutdown(ShutdownMode::Flush).await, 0);
        assert!(debouncer.is_stopped());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_lose_nothing() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 500;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let (debouncer, mut rx) = ChangeDebouncer::new(DebounceConfig {
            quiet_period: Duration::from_millis(20),
            channel_capacity: 64,
        })
        .expect("debouncer");
        let subscriptions: Vec<SubscriptionId> = (0..4).map(|_| Uuid::now_v7()).collect();

        let consumer = tokio::spawn(async move {
            let mut seen = std::collections::HashSet::new();
            let mut empty_batches = 0;
            let mut total = 0;
            while seen.len() < TOTAL {
                let Some(batch) = rx.recv().await else { break };
                if batch.is_empty() {
                    empty_batches += 1;
                }
                total += batch.len();
                for change in batch.changes {
                    assert_eq!(change.subscription_id, batch.subscription_id);
                    seen.insert((change.subscription_id, change.object_identifier));
                }
            }
            (seen.len(), total, empty_batches)
        });

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let debouncer = debouncer.clone();
                let subscriptions = subscriptions.clone();
                tokio::spawn(async move {
                    for n in 0..PER_PRODUCER {
                        let subscription_id = subscriptions[(producer + n) % subscriptions.len()];
                        assert!(debouncer.record_change(
                            subscription_id,
                            format!("Tables/p{}_{}.sql", producer, n),
                            ChangeSource::FileSystem,
                            ChangeKind::Modified,
                            None,
                        ));
                        if n % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.expect("producer");
        }
        debouncer.shutdown(ShutdownMode::Flush).await;

        let (distinct, delivered, empty_batches) =
            tokio::time::timeout(Duration::from_secs(10), consumer)
                .await
                .expect("consumer finished")
                .expect("consumer");
        assert_eq!(distinct, TOTAL);
        assert_eq!(delivered, TOTAL);
        assert_eq!(empty_batches, 0);
        assert_eq!(debouncer.metrics().snapshot().changes_recorded, TOTAL as u64);
    }
}
