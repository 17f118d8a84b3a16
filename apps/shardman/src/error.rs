//! Domain error types for the shard coordinator
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All application code returns Result<T, ShardmanError>.

use thiserror::Error;

/// Shard coordinator domain errors
///
/// Every variant carries structured context fields for diagnostics.
/// Callers pattern-match on the variant to decide what the worker must do
/// (retry later, re-register, or stop itself).
///
/// Example log output:
/// ```text
/// ShardmanError::FleetSizeMismatch { claimed: 6, actual: 5 }
/// → "fleet size mismatch: worker claims 6 shards, fleet has 5"
/// ```
#[derive(Error, Debug)]
pub enum ShardmanError {
    /// Fleet metadata source unreachable and nothing cached yet
    #[error("fleet metadata source unavailable")]
    UpstreamUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Every identity in [0, total) is held by a live shard
    #[error("no shards available ({live}/{total} live)")]
    FleetFull { live: usize, total: u32 },

    /// Heartbeat or disconnect for an unknown or evicted session
    #[error("session '{session_token}' not found")]
    SessionNotFound { session_token: String },

    /// Re-registration for an identity that is currently live
    #[error("shard {identity} is not available for re-registration")]
    IdentityNotAvailable { identity: u32 },

    /// Re-registration from a worker using an outdated fleet size
    #[error("fleet size mismatch: worker claims {claimed} shards, fleet has {actual}")]
    FleetSizeMismatch { claimed: u32, actual: u32 },

    /// Heartbeat from a shard whose identity no longer fits the fleet
    #[error("shard {identity} is outside the fleet of {total} shards")]
    IdentityOutOfRange { identity: u32, total: u32 },

    /// Repository insert for an identity that is already live.
    /// Indicates a locking-discipline bug.
    #[error("identity {identity} is already held by a live shard")]
    Conflict { identity: u32 },

    /// Shard repository backend failed
    #[error("shard repository operation failed")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Notification sink rejected an event
    #[error("notification for '{event_kind}' on shard {identity} failed")]
    NotificationFailed {
        event_kind: &'static str,
        identity: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// NATS connection failed
    #[error("NATS connection failed")]
    NatsConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Event serialization failed
    #[error("event serialization failed for '{event_kind}' on shard {identity}")]
    SerializationFailed {
        event_kind: &'static str,
        identity: u32,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),
}

impl ShardmanError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `shardman_errors_total` counter.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::FleetFull { .. } => "fleet_full",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::IdentityNotAvailable { .. } => "identity_not_available",
            Self::FleetSizeMismatch { .. } => "fleet_size_mismatch",
            Self::IdentityOutOfRange { .. } => "identity_out_of_range",
            Self::Conflict { .. } => "conflict",
            Self::Storage(_) => "storage",
            Self::NotificationFailed { .. } => "notification_failed",
            Self::NatsConnectionFailed(_) => "nats_connection",
            Self::SerializationFailed { .. } => "serialization",
            Self::Config(_) => "config",
        }
    }

    /// Whether the worker that received this error must stop itself.
    pub fn requires_worker_stop(&self) -> bool {
        matches!(
            self,
            Self::IdentityNotAvailable { .. } | Self::FleetSizeMismatch { .. }
        )
    }
}
