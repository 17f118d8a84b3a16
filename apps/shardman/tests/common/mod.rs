//! Shared test doubles for the coordinator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shardman::coordinator::{AdmissionConfig, Coordinator, CoordinatorConfig, LivenessConfig};
use shardman::fleet::{FleetMetadata, FleetMetadataCache, FleetMetadataSource, SourceError};
use shardman::notify::{EventKind, NotificationSink, ShardEvent};
use shardman::shard::{MemoryRepository, ShardRecord, ShardRepository};
use shardman::ShardmanError;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Fleet source whose size and availability tests can change
pub struct AdjustableSource {
    total: AtomicU32,
    failing: AtomicBool,
}

impl AdjustableSource {
    pub fn new(total: u32) -> Arc<Self> {
        Arc::new(Self {
            total: AtomicU32::new(total),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_total(&self, total: u32) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FleetMetadataSource for AdjustableSource {
    async fn fetch_metadata(&self) -> Result<FleetMetadata, SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("metadata source unreachable".into());
        }
        Ok(FleetMetadata::with_total(self.total.load(Ordering::SeqCst)))
    }
}

/// Sink that keeps every event it receives, or rejects them when failing
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ShardEvent>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn kinds(&self) -> Vec<(EventKind, u32)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.event_kind, e.identity))
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &ShardEvent) -> Result<(), ShardmanError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ShardmanError::NotificationFailed {
                event_kind: event.event_kind.as_str(),
                identity: event.identity,
                source: "broker unreachable".into(),
            });
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Memory repository whose inserts can be made to fail
#[derive(Default)]
pub struct FlakyRepository {
    inner: MemoryRepository,
    fail_inserts: AtomicBool,
}

impl FlakyRepository {
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ShardRepository for FlakyRepository {
    async fn insert(&self, record: ShardRecord) -> Result<(), ShardmanError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(ShardmanError::Storage("write rejected".into()));
        }
        self.inner.insert(record).await
    }

    async fn update(&self, record: ShardRecord) -> Result<(), ShardmanError> {
        self.inner.update(record).await
    }

    async fn delete(&self, session_token: &str) -> Result<Option<ShardRecord>, ShardmanError> {
        self.inner.delete(session_token).await
    }

    async fn delete_if_expired(
        &self,
        session_token: &str,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Option<ShardRecord>, ShardmanError> {
        self.inner
            .delete_if_expired(session_token, now, timeout)
            .await
    }

    async fn find_by_session(
        &self,
        session_token: &str,
    ) -> Result<Option<ShardRecord>, ShardmanError> {
        self.inner.find_by_session(session_token).await
    }

    async fn find_by_identity(&self, identity: u32) -> Result<Option<ShardRecord>, ShardmanError> {
        self.inner.find_by_identity(identity).await
    }

    async fn list_all(&self) -> Result<Vec<ShardRecord>, ShardmanError> {
        self.inner.list_all().await
    }
}

/// Memory repository that parks the sweep's eviction until released
#[derive(Default)]
pub struct GatedRepository {
    inner: MemoryRepository,
    eviction_reached: Notify,
    release_eviction: Notify,
}

impl GatedRepository {
    /// Wait until a sweep is about to evict a session
    pub async fn eviction_reached(&self) {
        self.eviction_reached.notified().await;
    }

    /// Let the parked eviction proceed
    pub fn release_eviction(&self) {
        self.release_eviction.notify_one();
    }
}

#[async_trait]
impl ShardRepository for GatedRepository {
    async fn insert(&self, record: ShardRecord) -> Result<(), ShardmanError> {
        self.inner.insert(record).await
    }

    async fn update(&self, record: ShardRecord) -> Result<(), ShardmanError> {
        self.inner.update(record).await
    }

    async fn delete(&self, session_token: &str) -> Result<Option<ShardRecord>, ShardmanError> {
        self.inner.delete(session_token).await
    }

    async fn delete_if_expired(
        &self,
        session_token: &str,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Option<ShardRecord>, ShardmanError> {
        self.eviction_reached.notify_one();
        self.release_eviction.notified().await;
        self.inner
            .delete_if_expired(session_token, now, timeout)
            .await
    }

    async fn find_by_session(
        &self,
        session_token: &str,
    ) -> Result<Option<ShardRecord>, ShardmanError> {
        self.inner.find_by_session(session_token).await
    }

    async fn find_by_identity(&self, identity: u32) -> Result<Option<ShardRecord>, ShardmanError> {
        self.inner.find_by_identity(identity).await
    }

    async fn list_all(&self) -> Result<Vec<ShardRecord>, ShardmanError> {
        self.inner.list_all().await
    }
}

/// Coordinator plus handles to its collaborators
pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub repository: Arc<dyn ShardRepository>,
    pub source: Arc<AdjustableSource>,
    pub sink: Arc<RecordingSink>,
}

pub fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        admission: AdmissionConfig {
            bucket_size: 5,
            window: Duration::from_secs(5),
        },
        liveness: LivenessConfig {
            heartbeat_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(20),
        },
        refund_on_persist_failure: false,
    }
}

pub fn harness(total_shards: u32) -> Harness {
    harness_with(total_shards, config(), Arc::new(MemoryRepository::new()))
}

pub fn harness_with(
    total_shards: u32,
    config: CoordinatorConfig,
    repository: Arc<dyn ShardRepository>,
) -> Harness {
    let source = AdjustableSource::new(total_shards);
    let sink = Arc::new(RecordingSink::default());
    // Zero TTL: every read sees the source's current fleet size.
    let fleet = Arc::new(FleetMetadataCache::new(source.clone(), Duration::ZERO));

    let coordinator = Arc::new(Coordinator::new(
        config,
        Arc::clone(&repository),
        fleet,
        sink.clone(),
    ));

    Harness {
        coordinator,
        repository,
        source,
        sink,
    }
}
