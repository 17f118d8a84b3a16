//! Shard event payloads

use crate::shard::ShardRecord;
use serde::Serialize;
use uuid::Uuid;

/// What happened to a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Admitted through connect or re-registration
    Connect,
    /// Explicit disconnect
    Disconnect,
    /// Evicted by the liveness sweep
    Timeout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Timeout => "timeout",
        }
    }
}

/// Event payload published to notification sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardEvent {
    pub event_id: String,
    pub event_kind: EventKind,
    pub identity: u32,
    pub session_token: String,
    /// Unix millis
    pub timestamp: u64,
}

impl ShardEvent {
    pub fn new(event_kind: EventKind, record: &ShardRecord) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            event_id: Uuid::new_v4().to_string(),
            event_kind,
            identity: record.identity,
            session_token: record.session_token.clone(),
            timestamp,
        }
    }
}
