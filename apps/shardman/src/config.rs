//! Shard coordinator configuration module
//!
//! Layers built-in defaults, an optional `shardman.toml` file and
//! `SHARDMAN_*` environment variables (after loading `.env`).

use crate::coordinator::{AdmissionConfig, CoordinatorConfig, LivenessConfig};
use crate::error::ShardmanError;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Upper bound on `bucket_size`
pub const MAX_BUCKET_SIZE: u32 = 10_000;

/// Upper bound on `window_secs`
pub const MAX_WINDOW_SECS: u64 = 3_600;

/// Shard coordinator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ShardmanConfig {
    /// Shared token compared against the `Authorization` header
    pub secret: String,

    /// Discord bot token; when set, fleet size comes from `GET /gateway/bot`
    #[serde(default)]
    pub discord_token: Option<String>,

    /// Static fleet size, used when no Discord token is configured
    #[serde(default)]
    pub total_shards: Option<u32>,

    /// Admissions allowed per window
    pub bucket_size: u32,

    /// Admission window length in seconds
    pub window_secs: u64,

    /// A shard silent for longer than this is evicted
    pub heartbeat_timeout_secs: u64,

    /// Liveness sweep period
    pub sweep_interval_secs: u64,

    /// Fleet metadata cache TTL
    pub metadata_ttl_secs: u64,

    /// Refund the admission slot when the record insert fails
    pub refund_on_persist_failure: bool,

    /// NATS server URL(s) - comma-separated for multiple servers
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Subject prefix for shard events
    pub nats_subject: String,

    /// HTTP port
    pub http_port: u16,

    /// Browser origins allowed by CORS; empty disables the CORS layer
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl ShardmanConfig {
    /// Load configuration from `.env`, `shardman.toml` and the environment
    pub fn load() -> Result<Self, ShardmanError> {
        dotenvy::dotenv().ok();

        let builder = Self::defaults()?
            .add_source(File::with_name("shardman").required(false))
            .add_source(
                Environment::with_prefix("SHARDMAN")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_origins"),
            );

        Self::from_builder(builder)
    }

    /// Builder pre-populated with every default value
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ShardmanError> {
        Config::builder()
            .set_default("bucket_size", 5_i64)
            .and_then(|b| b.set_default("window_secs", 5_i64))
            .and_then(|b| b.set_default("heartbeat_timeout_secs", 60_i64))
            .and_then(|b| b.set_default("sweep_interval_secs", 20_i64))
            .and_then(|b| b.set_default("metadata_ttl_secs", 300_i64))
            .and_then(|b| b.set_default("refund_on_persist_failure", false))
            .and_then(|b| b.set_default("nats_subject", "shardman.events"))
            .and_then(|b| b.set_default("http_port", 8000_i64))
            .and_then(|b| b.set_default("log_level", "info"))
            .map_err(|e| ShardmanError::Config(e.to_string()))
    }

    /// Build and validate configuration from a prepared builder
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ShardmanError> {
        let config: Self = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ShardmanError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the coordinator cannot run with
    pub fn validate(&self) -> Result<(), ShardmanError> {
        if self.secret.is_empty() {
            return Err(ShardmanError::Config("secret must not be empty".to_string()));
        }

        match (&self.discord_token, self.total_shards) {
            (None, None) => {
                return Err(ShardmanError::Config(
                    "one of discord_token or total_shards must be set".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ShardmanError::Config(
                    "discord_token and total_shards are mutually exclusive".to_string(),
                ))
            }
            _ => {}
        }

        if self.total_shards == Some(0) {
            return Err(ShardmanError::Config("total_shards must be at least 1".to_string()));
        }

        if self.bucket_size == 0 || self.window_secs == 0 {
            return Err(ShardmanError::Config(
                "bucket_size and window_secs must be positive".to_string(),
            ));
        }

        if self.bucket_size > MAX_BUCKET_SIZE || self.window_secs > MAX_WINDOW_SECS {
            return Err(ShardmanError::Config(format!(
                "bucket_size must be at most {MAX_BUCKET_SIZE} and window_secs at most {MAX_WINDOW_SECS}"
            )));
        }

        if self.sweep_interval_secs == 0 || self.sweep_interval_secs >= self.heartbeat_timeout_secs {
            return Err(ShardmanError::Config(format!(
                "sweep_interval_secs ({}) must be positive and shorter than heartbeat_timeout_secs ({})",
                self.sweep_interval_secs, self.heartbeat_timeout_secs
            )));
        }

        Ok(())
    }

    /// Fleet metadata cache TTL
    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    /// Settings for the coordination engine
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            admission: AdmissionConfig {
                bucket_size: self.bucket_size,
                window: Duration::from_secs(self.window_secs),
            },
            liveness: LivenessConfig {
                heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
                sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            },
            refund_on_persist_failure: self.refund_on_persist_failure,
        }
    }
}
