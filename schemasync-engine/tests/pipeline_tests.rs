//! End-to-end pipeline wiring and the reconciliation sweep.

use chrono::{Duration as ChronoDuration, Utc};
use schemasync_core::{ChangeKind, ChangeSource, SqlObjectType, SubscriptionId, SubscriptionState};
use schemasync_engine::jobs::{reconciliation_task, run_reconciliation_cycle, ReconciliationConfig, ReconciliationMetrics};
use schemasync_engine::{
    ChangePipeline, ComparisonOutcome, DebounceConfig, OrchestratorConfig,
    SchemaComparisonOrchestrator, ShutdownMode,
};
use schemasync_storage::{
    ComparisonHistoryRepository, PendingChangeRepository, SubscriptionRepository,
};
use schemasync_test_utils::fixtures::{
    active_subscription, change_at, manual_options, procedure, store_with,
    subscription_with_options,
};
use schemasync_test_utils::{
    InMemoryStore, MockSchemaSource, OrchestratorCall, RecordingNotifier, ScriptedOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn quick_debounce() -> DebounceConfig {
    DebounceConfig {
        quiet_period: Duration::from_millis(100),
        channel_capacity: 8,
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_pending_windows_into_processor() {
    let subscription = active_subscription("inventory");
    let store = store_with(std::slice::from_ref(&subscription)).await;
    let orchestrator = ScriptedOrchestrator::new();
    let pipeline = ChangePipeline::start(
        quick_debounce(),
        Arc::new(store.clone()),
        Arc::new(orchestrator.clone()),
    )
    .expect("pipeline");

    assert!(pipeline.record_change(
        subscription.id,
        "dbo.Foo",
        ChangeSource::Database,
        ChangeKind::Modified,
        Some(SqlObjectType::StoredProcedure),
    ));

    let report = pipeline.shutdown(ShutdownMode::Flush).await;

    assert_eq!(report.flushed_batches, 1);
    assert_eq!(report.processor.batches_processed, 1);
    assert_eq!(report.processor.changes_marked, 1);
    assert_eq!(orchestrator.calls().len(), 1);
    assert!(store
        .change_list_unprocessed(subscription.id)
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_discard_drops_pending_but_keeps_emitted_batches() {
    let subscription = active_subscription("inventory");
    let other = active_subscription("billing");
    let store = store_with(&[subscription.clone(), other.clone()]).await;
    let orchestrator = ScriptedOrchestrator::new();
    let pipeline = ChangePipeline::start(
        quick_debounce(),
        Arc::new(store.clone()),
        Arc::new(orchestrator.clone()),
    )
    .expect("pipeline");

    pipeline.record_change(
        subscription.id,
        "dbo.Foo",
        ChangeSource::Database,
        ChangeKind::Modified,
        Some(SqlObjectType::StoredProcedure),
    );
    // Let the first window close and emit.
    tokio::time::sleep(Duration::from_millis(250)).await;
    pipeline.record_change(
        other.id,
        "Tables/Orders.sql",
        ChangeSource::FileSystem,
        ChangeKind::Created,
        None,
    );

    let report = pipeline.shutdown(ShutdownMode::Discard).await;

    assert_eq!(report.flushed_batches, 0);
    assert_eq!(report.processor.batches_processed, 1);
    assert_eq!(store.change_count().expect("count"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_drives_real_orchestrator() {
    let subscription = active_subscription("inventory");
    let store = store_with(std::slice::from_ref(&subscription)).await;
    let source = MockSchemaSource::new()
        .with_database(vec![procedure("Foo", "SELECT 1")])
        .with_project(vec![procedure("Foo", "SELECT 2")]);
    let notifier = RecordingNotifier::new();
    let orchestrator = SchemaComparisonOrchestrator::new(
        Arc::new(store.clone()),
        Arc::new(source.clone()),
        Arc::new(notifier.clone()),
        OrchestratorConfig::default(),
    );
    let pipeline = ChangePipeline::start(
        quick_debounce(),
        Arc::new(store.clone()),
        Arc::new(orchestrator),
    )
    .expect("pipeline");

    pipeline.record_change(
        subscription.id,
        "[dbo].[Foo]",
        ChangeSource::Database,
        ChangeKind::Modified,
        Some(SqlObjectType::StoredProcedure),
    );
    let report = pipeline.shutdown(ShutdownMode::Flush).await;

    assert_eq!(report.processor.changes_marked, 1);
    let history = store.comparison_list(subscription.id).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].summary.modifications, 1);
    assert_eq!(notifier.count("ComparisonCompleted"), 1);
}

#[tokio::test]
async fn test_reconciliation_compares_subscriptions_with_leftovers() {
    let pending = active_subscription("pending");
    let clean = active_subscription("clean");
    let manual = subscription_with_options("manual", manual_options());
    let store = store_with(&[pending.clone(), clean.clone(), manual.clone()]).await;
    let earlier = Utc::now() - ChronoDuration::minutes(10);
    for change in [
        change_at(pending.id, earlier, false),
        change_at(pending.id, earlier, false),
        change_at(clean.id, earlier, true),
        change_at(manual.id, earlier, false),
    ] {
        store.change_record(&change).await.expect("record");
    }
    let orchestrator = ScriptedOrchestrator::new();
    let metrics = ReconciliationMetrics::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = run_reconciliation_cycle(&store, &orchestrator, &metrics, &shutdown_rx).await;

    assert_eq!(orchestrator.recovery_calls(), 1);
    assert_eq!(report.comparisons_run, 1);
    assert_eq!(report.changes_marked, 2);
    assert_eq!(
        orchestrator.calls(),
        vec![OrchestratorCall::Full {
            subscription_id: pending.id,
            full_comparison: true,
            trigger: "reconciliation".to_string(),
        }]
    );
    assert!(store
        .change_list_unprocessed(pending.id)
        .await
        .expect("list")
        .is_empty());
    assert_eq!(
        store
            .change_list_unprocessed(manual.id)
            .await
            .expect("list")
            .len(),
        1
    );
}

#[tokio::test]
async fn test_reconciliation_skips_busy_subscription() {
    let subscription = active_subscription("inventory");
    let store = store_with(std::slice::from_ref(&subscription)).await;
    store
        .change_record(&change_at(subscription.id, Utc::now(), false))
        .await
        .expect("record");
    let orchestrator = ScriptedOrchestrator::new();
    orchestrator.push_outcome(ComparisonOutcome::AlreadyRunning);
    let metrics = ReconciliationMetrics::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = run_reconciliation_cycle(&store, &orchestrator, &metrics, &shutdown_rx).await;

    assert_eq!(report.skipped_busy, 1);
    assert_eq!(report.changes_marked, 0);
    assert_eq!(metrics.snapshot().skipped_busy, 1);
    assert_eq!(
        store
            .change_list_unprocessed(subscription.id)
            .await
            .expect("list")
            .len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconciliation_task_stops_on_shutdown() {
    let store = store_with(&[]).await;
    let orchestrator = ScriptedOrchestrator::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(reconciliation_task(
        Arc::new(store),
        Arc::new(orchestrator),
        ReconciliationConfig {
            check_interval: Duration::from_secs(60),
        },
        shutdown_rx,
    ));
    tokio::time::sleep(Duration::from_secs(150)).await;
    shutdown_tx.send(true).expect("send");

    let metrics = handle.await.expect("join");
    assert_eq!(metrics.snapshot().cycles, 3);
}

fn real_orchestrator(store: &InMemoryStore) -> SchemaComparisonOrchestrator {
    let source = MockSchemaSource::new()
        .with_database(vec![procedure("Foo", "SELECT 1")])
        .with_project(vec![procedure("Foo", "SELECT 1")]);
    SchemaComparisonOrchestrator::new(
        Arc::new(store.clone()),
        Arc::new(source),
        Arc::new(RecordingNotifier::new()),
        OrchestratorConfig::default(),
    )
}

async fn state_of(store: &InMemoryStore, subscription_id: SubscriptionId) -> SubscriptionState {
    store
        .subscription_get(subscription_id)
        .await
        .expect("get")
        .expect("subscription")
        .state
}

#[tokio::test]
async fn test_reconciliation_unsticks_abandoned_comparing_state() {
    let subscription = active_subscription("inventory");
    let store = store_with(std::slice::from_ref(&subscription)).await;
    store
        .subscription_update_state(subscription.id, SubscriptionState::Comparing)
        .await
        .expect("state");
    store
        .change_record(&change_at(subscription.id, Utc::now(), false))
        .await
        .expect("record");
    let orchestrator = real_orchestrator(&store);
    let metrics = ReconciliationMetrics::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = run_reconciliation_cycle(&store, &orchestrator, &metrics, &shutdown_rx).await;

    assert_eq!(report.states_recovered, 1);
    assert_eq!(report.comparisons_run, 1);
    assert_eq!(report.changes_marked, 1);
    assert_eq!(state_of(&store, subscription.id).await, SubscriptionState::Active);
    assert!(store
        .change_list_unprocessed(subscription.id)
        .await
        .expect("list")
        .is_empty());
    assert_eq!(metrics.snapshot().states_recovered, 1);
}

#[tokio::test]
async fn test_reconciliation_leaves_live_run_alone() {
    let subscription = active_subscription("inventory");
    let store = store_with(std::slice::from_ref(&subscription)).await;
    store
        .subscription_update_state(subscription.id, SubscriptionState::Comparing)
        .await
        .expect("state");
    store
        .change_record(&change_at(subscription.id, Utc::now(), false))
        .await
        .expect("record");
    let orchestrator = real_orchestrator(&store);
    let _live = orchestrator
        .locks()
        .try_acquire(subscription.id, "database-change")
        .expect("lease");
    let metrics = ReconciliationMetrics::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = run_reconciliation_cycle(&store, &orchestrator, &metrics, &shutdown_rx).await;

    assert_eq!(report.states_recovered, 0);
    assert_eq!(report.comparisons_run, 0);
    assert_eq!(state_of(&store, subscription.id).await, SubscriptionState::Comparing);
}

#[tokio::test]
async fn test_reconciliation_retries_errored_subscription() {
    let subscription = active_subscription("inventory");
    let store = store_with(std::slice::from_ref(&subscription)).await;
    store
        .subscription_update_state(subscription.id, SubscriptionState::Error)
        .await
        .expect("state");
    store
        .change_record(&change_at(subscription.id, Utc::now(), false))
        .await
        .expect("record");
    let orchestrator = real_orchestrator(&store);
    let metrics = ReconciliationMetrics::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = run_reconciliation_cycle(&store, &orchestrator, &metrics, &shutdown_rx).await;

    assert_eq!(report.comparisons_run, 1);
    assert_eq!(report.changes_marked, 1);
    assert_eq!(state_of(&store, subscription.id).await, SubscriptionState::Active);
}
