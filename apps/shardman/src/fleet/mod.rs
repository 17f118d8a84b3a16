//! Fleet metadata
//!
//! The total shard count bounds every identity the coordinator hands out.
//! It comes from an external source and is cached with a TTL.

mod cache;
mod discord;

pub use cache::FleetMetadataCache;
pub use discord::DiscordGatewaySource;

use async_trait::async_trait;
use serde::Serialize;

/// Boxed error returned by metadata sources
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Upstream connection budget, as reported by Discord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStartLimit {
    pub total: u64,
    pub remaining: u64,
    pub reset_after_ms: u64,
    pub max_concurrency: u64,
}

/// Authoritative description of the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetMetadata {
    pub total_shards: u32,
    pub session_start_limit: Option<SessionStartLimit>,
}

impl FleetMetadata {
    /// Metadata carrying only a shard count
    pub fn with_total(total_shards: u32) -> Self {
        Self {
            total_shards,
            session_start_limit: None,
        }
    }
}

/// External source of the fleet size. May fail transiently.
#[async_trait]
pub trait FleetMetadataSource: Send + Sync {
    async fn fetch_metadata(&self) -> Result<FleetMetadata, SourceError>;
}

/// Fixed fleet size from configuration
#[derive(Debug, Clone, Copy)]
pub struct StaticFleetSource {
    total_shards: u32,
}

impl StaticFleetSource {
    pub fn new(total_shards: u32) -> Self {
        Self { total_shards }
    }
}

#[async_trait]
impl FleetMetadataSource for StaticFleetSource {
    async fn fetch_metadata(&self) -> Result<FleetMetadata, SourceError> {
        Ok(FleetMetadata::with_total(self.total_shards))
    }
}
