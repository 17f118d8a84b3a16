//! Liveness monitor
//!
//! A recurring sweep that evicts shards whose last heartbeat is older than
//! the timeout. Each eviction runs under the coordination lock, and the
//! repository re-checks expiry in the same step as the removal, so a
//! heartbeat accepted mid-sweep keeps its shard.

use crate::coordinator::lock::CoordinationLock;
use crate::error::ShardmanError;
use crate::metrics::ShardmanMetrics;
use crate::notify::{EventKind, Notifier};
use crate::shard::{ShardRecord, ShardRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Liveness settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    pub heartbeat_timeout: Duration,
    /// Should stay at or below a third of the timeout
    pub sweep_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(20),
        }
    }
}

/// Evicts shards that stopped heartbeating
pub struct LivenessMonitor {
    repository: Arc<dyn ShardRepository>,
    lock: Arc<CoordinationLock>,
    notifier: Notifier,
    metrics: ShardmanMetrics,
    config: LivenessConfig,
}

impl LivenessMonitor {
    pub fn new(
        repository: Arc<dyn ShardRepository>,
        lock: Arc<CoordinationLock>,
        notifier: Notifier,
        metrics: ShardmanMetrics,
        config: LivenessConfig,
    ) -> Self {
        Self {
            repository,
            lock,
            notifier,
            metrics,
            config,
        }
    }

    /// Run one sweep as of `now`, returning the evicted records
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<ShardRecord>, ShardmanError> {
        let timeout = self.config.heartbeat_timeout;
        let candidates: Vec<ShardRecord> = self
            .repository
            .list_all()
            .await?
            .into_iter()
            .filter(|record| record.is_expired(now, timeout))
            .collect();

        let mut evicted = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let removed = {
                let _guard = self.lock.acquire().await;
                self.repository
                    .delete_if_expired(&candidate.session_token, now, timeout)
                    .await?
            };

            let Some(record) = removed else {
                debug!(
                    identity = candidate.identity,
                    "Shard heartbeat or disconnect raced the sweep"
                );
                continue;
            };

            info!(
                identity = record.identity,
                session_token = %record.session_token,
                last_heartbeat = %record.last_heartbeat,
                "Evicting shard: heartbeat timed out"
            );
            self.metrics.record_eviction();
            self.notifier.notify(EventKind::Timeout, &record).await;
            evicted.push(record);
        }

        Ok(evicted)
    }

    /// Start the recurring sweep on the runtime
    pub fn spawn(self: Arc<Self>, cancel_token: CancellationToken) -> MonitorHandle {
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                sweep_interval_secs = self.config.sweep_interval.as_secs(),
                heartbeat_timeout_secs = self.config.heartbeat_timeout.as_secs(),
                "Liveness monitor started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Liveness monitor shutting down");
                        break;
                    }

                    _ = interval.tick() => {
                        match self.sweep(Utc::now()).await {
                            Ok(evicted) if !evicted.is_empty() => {
                                warn!(count = evicted.len(), "Evicted timed-out shards");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                self.metrics.record_error(e.error_type_label());
                                error!(error = %e, "Liveness sweep failed");
                            }
                        }
                    }
                }
            }
        });

        MonitorHandle {
            cancel_token,
            handle,
        }
    }
}

/// Handle to a running liveness monitor
pub struct MonitorHandle {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop sweeping and wait for an in-progress sweep to finish
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Liveness monitor task panicked");
        }
        info!("Liveness monitor stopped");
    }
}
