//! Shard records
//!
//! One record per registered shard, keyed by its session token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A currently-registered shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardRecord {
    /// Partition key in [0, total_shards)
    pub identity: u32,
    /// Identifies one connection lifetime; never reused
    pub session_token: String,
    pub last_heartbeat: DateTime<Utc>,
    pub workload_count: Option<u64>,
    pub latency: Option<f64>,
    pub extra_metadata: Option<serde_json::Value>,
}

/// Informational fields reported with every heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMetrics {
    #[serde(default)]
    pub workload_count: Option<u64>,
    #[serde(default)]
    pub latency: Option<f64>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

impl ShardRecord {
    /// Create a record with a freshly minted session token
    pub fn new(identity: u32, last_heartbeat: DateTime<Utc>) -> Self {
        Self {
            identity,
            session_token: mint_session_token(),
            last_heartbeat,
            workload_count: None,
            latency: None,
            extra_metadata: None,
        }
    }

    /// Record a heartbeat. Identity and session token are left untouched.
    pub fn apply_heartbeat(&mut self, metrics: HeartbeatMetrics, now: DateTime<Utc>) {
        self.last_heartbeat = now;
        self.workload_count = metrics.workload_count;
        self.latency = metrics.latency;
        self.extra_metadata = metrics.extra;
    }

    /// True once the shard has been silent for longer than `timeout`
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.last_heartbeat) > timeout
    }
}

/// Mint an opaque, unique session token
fn mint_session_token() -> String {
    Uuid::new_v4().simple().to_string()
}
