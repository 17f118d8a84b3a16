//! Discord `GET /gateway/bot` as a fleet metadata source

use crate::fleet::{FleetMetadata, FleetMetadataSource, SessionStartLimit, SourceError};
use async_trait::async_trait;
use tracing::debug;
use twilight_http::Client;
use twilight_model::gateway::connection_info::BotConnectionInfo;

/// Reads the recommended shard count for the bot from Discord
pub struct DiscordGatewaySource {
    http: Client,
}

impl DiscordGatewaySource {
    pub fn new(token: String) -> Self {
        Self {
            http: Client::new(token),
        }
    }
}

#[async_trait]
impl FleetMetadataSource for DiscordGatewaySource {
    async fn fetch_metadata(&self) -> Result<FleetMetadata, SourceError> {
        let info = self.http.gateway().authed().await?.model().await?;

        debug!(
            shards = info.shards,
            remaining = info.session_start_limit.remaining,
            "Fetched gateway info"
        );

        Ok(FleetMetadata::from(info))
    }
}

impl From<BotConnectionInfo> for FleetMetadata {
    fn from(info: BotConnectionInfo) -> Self {
        let limit = info.session_start_limit;
        Self {
            total_shards: info.shards,
            session_start_limit: Some(SessionStartLimit {
                total: u64::from(limit.total),
                remaining: u64::from(limit.remaining),
                reset_after_ms: u64::from(limit.reset_after),
                max_concurrency: u64::from(limit.max_concurrency),
            }),
        }
    }
}
