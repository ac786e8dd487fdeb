//! Orchestrator scenarios against the mock indexer and feed.

use super::{assert_continuous, wait_until, TestHarness};
use blockwatch_sync::mock::RecordingProvider;
use blockwatch_sync::{BlockId, Provider, SyncConfig, SyncError, SyncResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const FINISH: Duration = Duration::from_secs(5);

async fn finished(handle: JoinHandle<SyncResult<()>>) -> SyncResult<()> {
    tokio::time::timeout(FINISH, handle)
        .await
        .expect("sync did not stop")
        .expect("sync task panicked")
}

#[tokio::test]
async fn test_two_providers_history_then_live() {
    let harness = TestHarness::new(105);
    let a = harness.provider_at("a", 100);
    let b = harness.provider_at("b", 95);
    let config = SyncConfig {
        exit_at: Some(108),
        ..harness.sync_config()
    };
    let engine = harness.engine(&[a.clone(), b.clone()], config);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });

    assert!(wait_until(|| a.status().height == 105, FINISH).await);
    assert_eq!(harness.feed.subscriber_count(), 1);
    for _ in 0..3 {
        harness.mine_and_publish();
    }

    finished(handle).await.unwrap();

    assert_eq!(a.applied_heights(), (101..=108).collect::<Vec<_>>());
    assert_eq!(b.applied_heights(), (96..=108).collect::<Vec<_>>());
    assert_continuous(&b.applied());
    assert_eq!(a.ignored(), 6);
    assert_eq!(b.ignored(), 1);

    let status = engine.status().await;
    assert!(!status.is_running);
    assert_eq!(status.resume_point, Some(harness.id_at(95)));
    assert_eq!(status.blocks_delivered, 14);
    assert_eq!(status.reconnects, 0);
    assert!(status.last_block_time.is_some());
    assert_eq!(harness.feed.dial_count(), 1);
}

#[tokio::test]
async fn test_deliver_stops_at_first_failing_provider() {
    let harness = TestHarness::new(10);
    let a = harness.provider_at("a", 5);
    let b = harness.provider_at("b", 5);
    let engine = harness.engine(&[a.clone(), b.clone()], harness.sync_config());
    let b6 = harness.indexer.block(6).unwrap();

    a.fail_at(6);
    match engine.deliver(&b6).await {
        Err(SyncError::Provider { name, height, .. }) => {
            assert_eq!(name, "a");
            assert_eq!(height, 6);
        }
        other => panic!("expected provider error, got {:?}", other),
    }
    assert!(b.applied().is_empty());

    engine.deliver(&b6).await.unwrap();
    assert_eq!(a.applied_heights(), vec![6]);
    assert_eq!(b.applied_heights(), vec![6]);
}

#[tokio::test]
async fn test_provider_failure_reconnects_from_minimum() {
    let harness = TestHarness::new(5);
    let a = harness.provider_at("a", 2);
    let b = harness.provider_at("b", 2);
    a.fail_at(4);
    let config = SyncConfig {
        exit_at: Some(5),
        ..harness.sync_config()
    };
    let engine = harness.engine(&[a.clone(), b.clone()], config);

    engine.run(CancellationToken::new()).await.unwrap();

    // Neither provider misses block 4 even though delivery was cut short.
    assert_eq!(a.applied_heights(), vec![3, 4, 5]);
    assert_eq!(b.applied_heights(), vec![3, 4, 5]);
    assert_eq!(engine.status().await.reconnects, 1);
    assert_eq!(harness.feed.dial_count(), 2);
}

#[tokio::test]
async fn test_continuity_violation_reconnects() {
    let harness = TestHarness::new(5);
    let a = harness.provider_at("a", 5);
    let config = SyncConfig {
        exit_at: Some(7),
        ..harness.sync_config()
    };
    let engine = harness.engine(&[a.clone()], config);

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(CancellationToken::new()).await }
    });

    assert!(wait_until(|| a.ignored() == 1, FINISH).await);
    harness.indexer.mine();
    let b7 = harness.indexer.mine();
    harness.feed.publish(&b7);

    finished(handle).await.unwrap();
    assert_eq!(a.applied_heights(), vec![6, 7]);
    assert_eq!(engine.status().await.reconnects, 1);
    assert_eq!(harness.feed.dial_count(), 2);
}

#[tokio::test]
async fn test_shutdown_while_streaming() {
    let harness = TestHarness::new(3);
    let a = harness.provider_at("a", 0);
    let engine = harness.engine(&[a.clone()], harness.sync_config());

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });

    assert!(wait_until(|| a.status().height == 3, FINISH).await);
    assert!(engine.status().await.is_running);
    shutdown.cancel();

    finished(handle).await.unwrap();
    assert!(!engine.status().await.is_running);
    assert_eq!(harness.feed.subscriber_count(), 0);
}

#[tokio::test]
async fn test_shutdown_before_start() {
    let harness = TestHarness::new(3);
    let a = harness.provider_at("a", 0);
    let engine = harness.engine(&[a.clone()], harness.sync_config());

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    engine.run(shutdown).await.unwrap();
    assert_eq!(harness.feed.dial_count(), 0);
    assert!(a.applied().is_empty());
}

#[tokio::test]
async fn test_run_twice_is_rejected() {
    let harness = TestHarness::new(3);
    let a = harness.provider_at("a", 0);
    let engine = harness.engine(&[a.clone()], harness.sync_config());

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });
    assert!(wait_until(|| a.status().height == 3, FINISH).await);

    let err = engine.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));

    shutdown.cancel();
    finished(handle).await.unwrap();
}

#[tokio::test]
async fn test_no_enabled_providers_is_fatal() {
    let harness = TestHarness::new(3);
    let a = harness.provider_at("a", 0);
    a.set_enabled(false);
    let engine = harness.engine(&[a], harness.sync_config());

    let err = engine.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
    assert!(!err.is_recoverable());

    let empty = harness.engine(&[], harness.sync_config());
    assert!(empty.run(CancellationToken::new()).await.is_err());
}

#[tokio::test]
async fn test_disabled_provider_receives_nothing() {
    let harness = TestHarness::new(4);
    let a = harness.provider_at("a", 1);
    let b = harness.provider_at("b", 0);
    b.set_enabled(false);
    let config = SyncConfig {
        exit_at: Some(4),
        ..harness.sync_config()
    };
    let engine = harness.engine(&[a.clone(), b.clone()], config);

    engine.run(CancellationToken::new()).await.unwrap();
    assert_eq!(a.applied_heights(), vec![2, 3, 4]);
    assert!(b.applied().is_empty());
    assert_eq!(engine.status().await.resume_point, Some(harness.id_at(1)));
}

#[tokio::test]
async fn test_dial_failure_is_retried() {
    let harness = TestHarness::new(3);
    harness.feed.set_fail_dial(true);
    let a = harness.provider_at("a", 0);
    let config = SyncConfig {
        exit_at: Some(3),
        ..harness.sync_config()
    };
    let engine = harness.engine(&[a.clone()], config);

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(CancellationToken::new()).await }
    });

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(a.applied().is_empty());
    harness.feed.set_fail_dial(false);

    finished(handle).await.unwrap();
    assert_eq!(a.applied_heights(), vec![1, 2, 3]);
    assert_eq!(harness.feed.dial_count(), 1);
}

#[tokio::test]
async fn test_catch_up_alone_reaches_exit_height() {
    let harness = TestHarness::new(10);
    let a = Arc::new(
        RecordingProvider::new("a", harness.id_at(0)).with_history(harness.indexer.clone()),
    );
    let config = SyncConfig {
        exit_at: Some(10),
        ..harness.sync_config()
    };
    let engine = harness.engine(&[a.clone()], config);

    engine.run(CancellationToken::new()).await.unwrap();
    assert_eq!(a.applied_heights(), (1..=10).collect::<Vec<_>>());
    assert_eq!(harness.feed.dial_count(), 0);
    assert_eq!(engine.status().await.blocks_delivered, 0);
}

#[tokio::test]
async fn test_cursor_without_hash_starts_at_its_height() {
    let harness = TestHarness::new(5);
    let a = Arc::new(RecordingProvider::new("a", BlockId::at_height(3)));
    let config = SyncConfig {
        exit_at: Some(5),
        ..harness.sync_config()
    };
    let engine = harness.engine(&[a.clone()], config);

    engine.run(CancellationToken::new()).await.unwrap();
    assert_eq!(a.applied_heights(), vec![3, 4, 5]);
    assert_eq!(a.ignored(), 0);
}
