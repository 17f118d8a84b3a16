//! Shard coordination engine
//!
//! Connection requests flow through admission, allocation and the
//! repository insert under one [`CoordinationLock`]; heartbeats go straight
//! to the repository; the [`LivenessMonitor`] sweeps independently.

mod admission;
mod allocator;
mod liveness;
mod lock;

pub use admission::{Admission, AdmissionConfig, AdmissionController, AdmissionWindow};
pub use allocator::IdentityAllocator;
pub use liveness::{LivenessConfig, LivenessMonitor, MonitorHandle};
pub use lock::{CoordinationGuard, CoordinationLock};

use crate::error::ShardmanError;
use crate::fleet::{FleetMetadata, FleetMetadataCache};
use crate::metrics::ShardmanMetrics;
use crate::notify::{EventKind, NotificationSink, Notifier};
use crate::shard::{HeartbeatMetrics, ShardRecord, ShardRepository};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Coordination engine settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub admission: AdmissionConfig,
    pub liveness: LivenessConfig,
    /// Give the admission slot back when the record insert fails
    pub refund_on_persist_failure: bool,
}

/// A shard admitted through connect or re-registration
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectGrant {
    pub record: ShardRecord,
    pub total_shards: u32,
    /// How long the worker must wait before connecting upstream
    pub wait: Duration,
}

/// Shard coordinator
pub struct Coordinator {
    repository: Arc<dyn ShardRepository>,
    fleet: Arc<FleetMetadataCache>,
    lock: Arc<CoordinationLock>,
    admission: AdmissionController,
    allocator: IdentityAllocator,
    notifier: Notifier,
    metrics: ShardmanMetrics,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        repository: Arc<dyn ShardRepository>,
        fleet: Arc<FleetMetadataCache>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let metrics = ShardmanMetrics::new();

        Self {
            repository,
            fleet,
            lock: Arc::new(CoordinationLock::new()),
            admission: AdmissionController::new(config.admission),
            allocator: IdentityAllocator::new(),
            notifier: Notifier::new(sink, metrics),
            metrics,
            config,
        }
    }

    /// Liveness monitor sharing this coordinator's lock and repository
    pub fn liveness_monitor(&self) -> LivenessMonitor {
        LivenessMonitor::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.lock),
            self.notifier.clone(),
            self.metrics,
            self.config.liveness,
        )
    }

    /// Admit a new shard and assign it the lowest free identity
    pub async fn connect(&self) -> Result<ConnectGrant, ShardmanError> {
        let result = self.connect_inner().await;
        self.observe(result)
    }

    async fn connect_inner(&self) -> Result<ConnectGrant, ShardmanError> {
        // Fleet metadata I/O stays outside the lock.
        let total_shards = self.fleet.get_total_shards().await?;

        let live_count = self.repository.list_all().await?.len();
        if live_count >= total_shards as usize {
            return Err(ShardmanError::FleetFull {
                live: live_count,
                total: total_shards,
            });
        }

        let (record, admission) = {
            let mut guard = self.lock.acquire().await;
            let admission = self.admission.admit(&mut guard, Utc::now());

            let live = self.live_identities().await?;
            let identity = self.allocator.allocate(&guard, &live, total_shards)?;
            let record = ShardRecord::new(identity, admission.effective_at);

            if let Err(e) = self.repository.insert(record.clone()).await {
                if self.config.refund_on_persist_failure {
                    self.admission.refund(&mut guard);
                }
                if matches!(e, ShardmanError::Conflict { .. }) {
                    error!(identity, error = %e, "Allocated identity already live");
                }
                return Err(e);
            }

            (record, admission)
        };

        if admission.is_throttled() {
            warn!(
                identity = record.identity,
                wait_ms = admission.wait.as_millis() as u64,
                "Admission deferred by one window"
            );
        }
        info!(
            identity = record.identity,
            session_token = %record.session_token,
            total_shards,
            "Shard connected"
        );

        self.metrics.record_admission(admission.is_throttled());
        self.notifier.notify(EventKind::Connect, &record).await;

        Ok(ConnectGrant {
            record,
            total_shards,
            wait: admission.wait,
        })
    }

    /// Record a heartbeat for a live session
    pub async fn heartbeat(
        &self,
        session_token: &str,
        metrics: HeartbeatMetrics,
    ) -> Result<(), ShardmanError> {
        let result = self.heartbeat_inner(session_token, metrics).await;
        self.observe(result)
    }

    async fn heartbeat_inner(
        &self,
        session_token: &str,
        metrics: HeartbeatMetrics,
    ) -> Result<(), ShardmanError> {
        let mut record = self
            .repository
            .find_by_session(session_token)
            .await?
            .ok_or_else(|| ShardmanError::SessionNotFound {
                session_token: session_token.to_string(),
            })?;

        let total_shards = self.fleet.get_total_shards().await?;
        if record.identity >= total_shards {
            return Err(ShardmanError::IdentityOutOfRange {
                identity: record.identity,
                total: total_shards,
            });
        }

        record.apply_heartbeat(metrics, Utc::now());
        let identity = record.identity;

        // Fails with SessionNotFound if the sweep evicted the session meanwhile.
        self.repository.update(record).await?;

        debug!(identity, "Heartbeat");
        self.metrics.record_heartbeat();
        Ok(())
    }

    /// Release a session's identity
    pub async fn disconnect(&self, session_token: &str) -> Result<ShardRecord, ShardmanError> {
        let result = self.disconnect_inner(session_token).await;
        self.observe(result)
    }

    async fn disconnect_inner(&self, session_token: &str) -> Result<ShardRecord, ShardmanError> {
        let removed = {
            let _guard = self.lock.acquire().await;
            self.repository.delete(session_token).await?
        };

        let record = removed.ok_or_else(|| ShardmanError::SessionNotFound {
            session_token: session_token.to_string(),
        })?;

        info!(
            identity = record.identity,
            session_token = %record.session_token,
            "Shard disconnected"
        );
        self.metrics.record_disconnect();
        self.notifier.notify(EventKind::Disconnect, &record).await;
        Ok(record)
    }

    /// Let a restarting worker reclaim a missing identity.
    ///
    /// On any error the worker must stop itself. No admission slot is used.
    pub async fn reregister(
        &self,
        identity: u32,
        claimed_total: u32,
    ) -> Result<ConnectGrant, ShardmanError> {
        let result = self.reregister_inner(identity, claimed_total).await;
        self.observe(result)
    }

    async fn reregister_inner(
        &self,
        identity: u32,
        claimed_total: u32,
    ) -> Result<ConnectGrant, ShardmanError> {
        let total_shards = self.fleet.get_total_shards().await?;

        let record = {
            let _guard = self.lock.acquire().await;

            let live = self.live_identities().await?;
            if !self
                .allocator
                .missing_identities(&live, total_shards)
                .contains(&identity)
            {
                return Err(ShardmanError::IdentityNotAvailable { identity });
            }

            if claimed_total != total_shards {
                return Err(ShardmanError::FleetSizeMismatch {
                    claimed: claimed_total,
                    actual: total_shards,
                });
            }

            let record = ShardRecord::new(identity, Utc::now());
            self.repository.insert(record.clone()).await?;
            record
        };

        info!(
            identity,
            session_token = %record.session_token,
            "Shard re-registered"
        );
        self.metrics.record_reregistration();
        self.notifier.notify(EventKind::Connect, &record).await;

        Ok(ConnectGrant {
            record,
            total_shards,
            wait: Duration::ZERO,
        })
    }

    /// Every live record, ordered by identity
    pub async fn status(&self) -> Result<Vec<ShardRecord>, ShardmanError> {
        let result = self.repository.list_all().await;
        self.observe(result)
    }

    /// Identities in [0, total) without a live record
    pub async fn missing_identities(&self) -> Result<BTreeSet<u32>, ShardmanError> {
        let result = async {
            let total_shards = self.fleet.get_total_shards().await?;
            let live = self.live_identities().await?;
            Ok::<_, ShardmanError>(self.allocator.missing_identities(&live, total_shards))
        }
        .await;
        self.observe(result)
    }

    /// Sum of reported workload across live shards
    pub async fn total_workload(&self) -> Result<u64, ShardmanError> {
        let records = self.status().await?;
        Ok(records.iter().filter_map(|r| r.workload_count).sum())
    }

    /// Current fleet size
    pub async fn total_shards(&self) -> Result<u32, ShardmanError> {
        let result = self.fleet.get_total_shards().await;
        self.observe(result)
    }

    /// Cached fleet metadata
    pub async fn fleet_info(&self) -> Result<FleetMetadata, ShardmanError> {
        let result = self.fleet.get_metadata().await;
        self.observe(result)
    }

    /// Refresh the live-shard gauges
    pub async fn update_gauges(&self) -> Result<(), ShardmanError> {
        let total_shards = self.total_shards().await?;
        let live = self.status().await?.len();
        self.metrics.set_fleet(live, total_shards);
        Ok(())
    }

    async fn live_identities(&self) -> Result<Vec<u32>, ShardmanError> {
        Ok(self
            .repository
            .list_all()
            .await?
            .iter()
            .map(|r| r.identity)
            .collect())
    }

    fn observe<T>(&self, result: Result<T, ShardmanError>) -> Result<T, ShardmanError> {
        if let Err(ref e) = result {
            self.metrics.record_error(e.error_type_label());
        }
        result
    }
}
