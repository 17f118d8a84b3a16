//! Coordination engine behavior: admission, allocation, liveness and
//! re-registration against the in-memory repository.

mod common;

use chrono::Utc;
use common::{config, harness, harness_with, FlakyRepository, GatedRepository};
use shardman::notify::EventKind;
use shardman::shard::{HeartbeatMetrics, MemoryRepository, ShardRecord, ShardRepository};
use shardman::ShardmanError;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

async fn seed(h: &common::Harness, identities: &[u32]) -> Vec<ShardRecord> {
    let mut records = Vec::new();
    for &identity in identities {
        let record = ShardRecord::new(identity, Utc::now());
        h.repository.insert(record.clone()).await.unwrap();
        records.push(record);
    }
    records
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connects_fill_fleet_then_reject() {
    let h = harness(3);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.connect().await })
        })
        .collect();

    let mut identities = BTreeSet::new();
    for handle in handles {
        let grant = handle.await.unwrap().unwrap();
        assert_eq!(grant.total_shards, 3);
        identities.insert(grant.record.identity);
    }
    assert_eq!(identities, BTreeSet::from([0, 1, 2]));

    let err = h.coordinator.connect().await.unwrap_err();
    assert!(matches!(err, ShardmanError::FleetFull { live: 3, total: 3 }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_connects_never_share_an_identity() {
    let h = harness(40);

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.connect().await })
        })
        .collect();

    let mut identities = BTreeSet::new();
    let mut sessions = BTreeSet::new();
    for handle in handles {
        let grant = handle.await.unwrap().unwrap();
        assert!(identities.insert(grant.record.identity), "duplicate identity");
        assert!(sessions.insert(grant.record.session_token), "duplicate session");
    }
    assert_eq!(identities, (0..40).collect::<BTreeSet<u32>>());
}

#[tokio::test]
async fn connect_reuses_lowest_free_identity() {
    let h = harness(5);
    seed(&h, &[0, 2, 3]).await;

    let grant = h.coordinator.connect().await.unwrap();
    assert_eq!(grant.record.identity, 1);

    let grant = h.coordinator.connect().await.unwrap();
    assert_eq!(grant.record.identity, 4);
}

#[tokio::test]
async fn sixth_connect_in_window_waits_and_is_predated() {
    let h = harness(10);

    for _ in 0..5 {
        let grant = h.coordinator.connect().await.unwrap();
        assert_eq!(grant.wait, Duration::ZERO);
    }

    let before = Utc::now();
    let deferred = h.coordinator.connect().await.unwrap();
    assert_eq!(deferred.wait, Duration::from_secs(5));
    assert!(deferred.record.last_heartbeat >= before + chrono::Duration::seconds(5));

    let next = h.coordinator.connect().await.unwrap();
    assert_eq!(next.wait, Duration::ZERO);
}

#[tokio::test]
async fn connect_notifies_sink() {
    let h = harness(2);

    let grant = h.coordinator.connect().await.unwrap();
    assert_eq!(h.sink.kinds(), vec![(EventKind::Connect, grant.record.identity)]);
}

#[tokio::test]
async fn connect_succeeds_when_notification_sink_fails() {
    let h = harness(2);
    h.sink.set_failing(true);

    let grant = h.coordinator.connect().await.unwrap();
    assert_eq!(grant.record.identity, 0);
    assert!(h.sink.kinds().is_empty());

    h.coordinator
        .disconnect(&grant.record.session_token)
        .await
        .unwrap();
    assert!(h.coordinator.status().await.unwrap().is_empty());
}

#[tokio::test]
async fn connect_fails_without_fleet_metadata() {
    let h = harness(3);
    h.source.set_failing(true);

    let err = h.coordinator.connect().await.unwrap_err();
    assert!(matches!(err, ShardmanError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn connect_serves_stale_fleet_size_when_source_fails() {
    let h = harness(3);
    h.coordinator.connect().await.unwrap();

    h.source.set_failing(true);
    let grant = h.coordinator.connect().await.unwrap();
    assert_eq!(grant.total_shards, 3);
    assert_eq!(grant.record.identity, 1);
}

#[tokio::test]
async fn failed_persist_keeps_slot_consumed() {
    let mut settings = config();
    settings.admission.bucket_size = 1;
    let repository = Arc::new(FlakyRepository::default());
    let h = harness_with(3, settings, repository.clone());

    repository.set_fail_inserts(true);
    let err = h.coordinator.connect().await.unwrap_err();
    assert!(matches!(err, ShardmanError::Storage(_)));

    repository.set_fail_inserts(false);
    let grant = h.coordinator.connect().await.unwrap();
    assert_eq!(grant.wait, Duration::from_secs(5));
    assert_eq!(h.sink.kinds().len(), 1);
}

#[tokio::test]
async fn failed_persist_refunds_slot_when_configured() {
    let mut settings = config();
    settings.admission.bucket_size = 1;
    settings.refund_on_persist_failure = true;
    let repository = Arc::new(FlakyRepository::default());
    let h = harness_with(3, settings, repository.clone());

    repository.set_fail_inserts(true);
    h.coordinator.connect().await.unwrap_err();

    repository.set_fail_inserts(false);
    let grant = h.coordinator.connect().await.unwrap();
    assert_eq!(grant.wait, Duration::ZERO);
}

#[tokio::test]
async fn heartbeats_only_touch_liveness_and_metrics() {
    let h = harness(3);
    let grant = h.coordinator.connect().await.unwrap();
    let token = grant.record.session_token.clone();

    for count in [10, 20, 30] {
        h.coordinator
            .heartbeat(
                &token,
                HeartbeatMetrics {
                    workload_count: Some(count),
                    latency: Some(0.1),
                    extra: Some(serde_json::json!({"region": "eu"})),
                },
            )
            .await
            .unwrap();

        let record = h.repository.find_by_session(&token).await.unwrap().unwrap();
        assert_eq!(record.identity, grant.record.identity);
        assert_eq!(record.session_token, token);
        assert_eq!(record.workload_count, Some(count));
        assert!(record.last_heartbeat >= grant.record.last_heartbeat);
    }

    assert_eq!(h.coordinator.total_workload().await.unwrap(), 30);
}

#[tokio::test]
async fn heartbeat_for_unknown_session_fails() {
    let h = harness(3);

    let err = h
        .coordinator
        .heartbeat("no-such-session", HeartbeatMetrics::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ShardmanError::SessionNotFound { .. }));
}

#[tokio::test]
async fn heartbeat_after_fleet_shrink_is_rejected_but_not_evicted() {
    let h = harness(5);
    let records = seed(&h, &[4]).await;

    h.source.set_total(3);
    let err = h
        .coordinator
        .heartbeat(&records[0].session_token, HeartbeatMetrics::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ShardmanError::IdentityOutOfRange { identity: 4, total: 3 }
    ));
    assert!(h.repository.find_by_identity(4).await.unwrap().is_some());
}

#[tokio::test]
async fn disconnect_frees_identity_and_notifies() {
    let h = harness(2);
    let first = h.coordinator.connect().await.unwrap();
    h.coordinator.connect().await.unwrap();

    let removed = h
        .coordinator
        .disconnect(&first.record.session_token)
        .await
        .unwrap();
    assert_eq!(removed.identity, 0);
    assert_eq!(h.sink.kinds().last(), Some(&(EventKind::Disconnect, 0)));

    let again = h.coordinator.connect().await.unwrap();
    assert_eq!(again.record.identity, 0);
    assert_ne!(again.record.session_token, first.record.session_token);

    let err = h
        .coordinator
        .disconnect(&first.record.session_token)
        .await
        .unwrap_err();
    assert!(matches!(err, ShardmanError::SessionNotFound { .. }));
}

#[tokio::test]
async fn sweep_evicts_silent_shards_and_frees_identity() {
    let h = harness(3);
    let stale = h.coordinator.connect().await.unwrap();
    let fresh = h.coordinator.connect().await.unwrap();

    let mut record = stale.record.clone();
    record.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
    h.repository.update(record).await.unwrap();

    let monitor = h.coordinator.liveness_monitor();
    let evicted = monitor.sweep(Utc::now()).await.unwrap();

    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].identity, stale.record.identity);
    assert!(h
        .repository
        .find_by_session(&fresh.record.session_token)
        .await
        .unwrap()
        .is_some());
    assert_eq!(
        h.sink.kinds().last(),
        Some(&(EventKind::Timeout, stale.record.identity))
    );

    // Late heartbeat for the evicted session.
    let err = h
        .coordinator
        .heartbeat(&stale.record.session_token, HeartbeatMetrics::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ShardmanError::SessionNotFound { .. }));

    let reclaimed = h.coordinator.connect().await.unwrap();
    assert_eq!(reclaimed.record.identity, stale.record.identity);
}

#[tokio::test]
async fn sweep_keeps_shards_within_timeout() {
    let h = harness(3);
    h.coordinator.connect().await.unwrap();

    let evicted = h
        .coordinator
        .liveness_monitor()
        .sweep(Utc::now() + chrono::Duration::seconds(59))
        .await
        .unwrap();
    assert!(evicted.is_empty());
    assert_eq!(h.coordinator.status().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_accepted_during_sweep_keeps_its_shard() {
    let repository = Arc::new(GatedRepository::default());
    let h = harness_with(2, config(), repository.clone());
    let grant = h.coordinator.connect().await.unwrap();
    let token = grant.record.session_token.clone();

    let mut record = grant.record.clone();
    record.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
    h.repository.update(record).await.unwrap();

    let monitor = h.coordinator.liveness_monitor();
    let sweep_at = Utc::now();
    let sweep = tokio::spawn(async move { monitor.sweep(sweep_at).await });

    // The sweep has listed the shard as expired and is about to evict it.
    repository.eviction_reached().await;
    h.coordinator
        .heartbeat(&token, HeartbeatMetrics::default())
        .await
        .unwrap();
    repository.release_eviction();

    let evicted = sweep.await.unwrap().unwrap();
    assert!(evicted.is_empty());
    assert!(h
        .repository
        .find_by_session(&token)
        .await
        .unwrap()
        .is_some());
    assert!(!h.sink.kinds().contains(&(EventKind::Timeout, 0)));

    let next = h.coordinator.connect().await.unwrap();
    assert_eq!(next.record.identity, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_after_eviction_during_sweep_fails() {
    let repository = Arc::new(GatedRepository::default());
    let h = harness_with(2, config(), repository.clone());
    let grant = h.coordinator.connect().await.unwrap();

    let mut record = grant.record.clone();
    record.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
    h.repository.update(record).await.unwrap();

    let monitor = h.coordinator.liveness_monitor();
    let sweep = tokio::spawn(async move { monitor.sweep(Utc::now()).await });

    repository.eviction_reached().await;
    repository.release_eviction();
    assert_eq!(sweep.await.unwrap().unwrap().len(), 1);

    let err = h
        .coordinator
        .heartbeat(&grant.record.session_token, HeartbeatMetrics::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ShardmanError::SessionNotFound { .. }));
}

#[tokio::test]
async fn spawned_monitor_evicts_and_shuts_down() {
    let mut settings = config();
    settings.liveness.heartbeat_timeout = Duration::from_millis(100);
    settings.liveness.sweep_interval = Duration::from_millis(30);
    let h = harness_with(2, settings, Arc::new(MemoryRepository::new()));

    h.coordinator.connect().await.unwrap();

    let monitor = Arc::new(h.coordinator.liveness_monitor())
        .spawn(tokio_util::sync::CancellationToken::new());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.coordinator.status().await.unwrap().is_empty());

    monitor.shutdown().await;
    assert!(h.sink.kinds().contains(&(EventKind::Timeout, 0)));
}

#[tokio::test]
async fn reregister_follows_protocol_rules() {
    let h = harness(5);
    seed(&h, &[0, 1, 3]).await;

    let err = h.coordinator.reregister(1, 5).await.unwrap_err();
    assert!(matches!(err, ShardmanError::IdentityNotAvailable { identity: 1 }));
    assert!(err.requires_worker_stop());

    let err = h.coordinator.reregister(2, 6).await.unwrap_err();
    assert!(matches!(
        err,
        ShardmanError::FleetSizeMismatch { claimed: 6, actual: 5 }
    ));
    assert!(err.requires_worker_stop());

    let grant = h.coordinator.reregister(2, 5).await.unwrap();
    assert_eq!(grant.record.identity, 2);
    assert_eq!(grant.wait, Duration::ZERO);
    assert_eq!(h.sink.kinds(), vec![(EventKind::Connect, 2)]);

    let err = h.coordinator.reregister(2, 5).await.unwrap_err();
    assert!(matches!(err, ShardmanError::IdentityNotAvailable { identity: 2 }));
}

#[tokio::test]
async fn reregister_does_not_consume_admission_slots() {
    let h = harness(20);

    for identity in 0..10 {
        h.coordinator.reregister(identity, 20).await.unwrap();
    }

    let grant = h.coordinator.connect().await.unwrap();
    assert_eq!(grant.record.identity, 10);
    assert_eq!(grant.wait, Duration::ZERO);
}

#[tokio::test]
async fn reregister_outside_fleet_is_not_available() {
    let h = harness(3);

    let err = h.coordinator.reregister(3, 3).await.unwrap_err();
    assert!(matches!(err, ShardmanError::IdentityNotAvailable { identity: 3 }));
}

#[tokio::test]
async fn missing_identities_is_complement_of_live_set() {
    let h = harness(5);
    seed(&h, &[0, 1, 3]).await;

    let missing = h.coordinator.missing_identities().await.unwrap();
    assert_eq!(missing, BTreeSet::from([2, 4]));
}
