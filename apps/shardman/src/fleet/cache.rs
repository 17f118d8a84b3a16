//! TTL cache over a fleet metadata source
//!
//! Serves stale data when a refresh fails, and keeps serving it for a short
//! retry interval before the next attempt. Concurrent refreshes collapse
//! into a single upstream call.

use crate::error::ShardmanError;
use crate::fleet::{FleetMetadata, FleetMetadataSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Longest a stale value is served before the next upstream attempt
const RETRY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct CachedMetadata {
    metadata: FleetMetadata,
    expires_at: Instant,
}

/// `now + ttl`, saturating far in the future instead of overflowing
fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 60 * 60))
}

/// Cached view of the fleet size
pub struct FleetMetadataCache {
    source: Arc<dyn FleetMetadataSource>,
    ttl: Duration,
    cached: RwLock<Option<CachedMetadata>>,
    /// Held for the duration of an upstream fetch
    refresh: Mutex<()>,
    /// Completed fetch attempts, successful or not
    attempts: AtomicU64,
}

impl FleetMetadataCache {
    pub fn new(source: Arc<dyn FleetMetadataSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
            attempts: AtomicU64::new(0),
        }
    }

    /// Total shard count, refreshing lazily once the TTL has elapsed
    pub async fn get_total_shards(&self) -> Result<u32, ShardmanError> {
        self.get_metadata().await.map(|m| m.total_shards)
    }

    /// Full fleet metadata, refreshing lazily once the TTL has elapsed
    pub async fn get_metadata(&self) -> Result<FleetMetadata, ShardmanError> {
        // Loaded before the cache check: a fetch that completes in between
        // is then observed under the refresh lock.
        let seen = self.attempts.load(Ordering::Acquire);

        if let Some(cached) = self.cached.read().await.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.metadata.clone());
            }
        }

        self.refresh_after(seen).await
    }

    async fn refresh_after(&self, seen: u64) -> Result<FleetMetadata, ShardmanError> {
        let _in_flight = self.refresh.lock().await;

        if self.attempts.load(Ordering::Acquire) != seen {
            debug!("Fleet metadata refreshed by a concurrent caller");
            return self.cached_or_unavailable().await;
        }

        let outcome = match self.source.fetch_metadata().await {
            Ok(metadata) => {
                let mut cached = self.cached.write().await;
                let previous = cached.as_ref().map(|c| c.metadata.total_shards);
                if previous != Some(metadata.total_shards) {
                    info!(
                        total_shards = metadata.total_shards,
                        previous = ?previous,
                        "Fleet size updated"
                    );
                }
                *cached = Some(CachedMetadata {
                    metadata: metadata.clone(),
                    expires_at: expiry(Instant::now(), self.ttl),
                });
                Ok(metadata)
            }
            Err(source) => match self.cached.write().await.as_mut() {
                Some(stale) => {
                    warn!(
                        error = %source,
                        total_shards = stale.metadata.total_shards,
                        "Fleet metadata refresh failed, serving stale value"
                    );
                    stale.expires_at = expiry(Instant::now(), self.ttl.min(RETRY_INTERVAL));
                    Ok(stale.metadata.clone())
                }
                None => Err(ShardmanError::UpstreamUnavailable(source)),
            },
        };

        // Published only after the cache is written.
        self.attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn cached_or_unavailable(&self) -> Result<FleetMetadata, ShardmanError> {
        self.cached
            .read()
            .await
            .as_ref()
            .map(|c| c.metadata.clone())
            .ok_or_else(|| ShardmanError::UpstreamUnavailable("fleet metadata refresh failed".into()))
    }
}
