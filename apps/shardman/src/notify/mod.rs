//! Shard lifecycle notifications
//!
//! Delivery is best-effort: sink failures are logged and counted, never
//! returned to the operation that triggered them.

mod event;
mod nats;

pub use event::{EventKind, ShardEvent};
pub use nats::NatsSink;

use crate::error::ShardmanError;
use crate::metrics::ShardmanMetrics;
use crate::shard::ShardRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Outbound transport for shard events
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &ShardEvent) -> Result<(), ShardmanError>;
}

/// Sink that only writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, event: &ShardEvent) -> Result<(), ShardmanError> {
        info!(
            event_kind = event.event_kind.as_str(),
            identity = event.identity,
            session_token = %event.session_token,
            "Shard event"
        );
        Ok(())
    }
}

/// Fire-and-forget front for a [`NotificationSink`]
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    metrics: ShardmanMetrics,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, metrics: ShardmanMetrics) -> Self {
        Self { sink, metrics }
    }

    /// Emit an event for `record`, swallowing delivery failures
    pub async fn notify(&self, kind: EventKind, record: &ShardRecord) {
        let event = ShardEvent::new(kind, record);

        if let Err(e) = self.sink.notify(&event).await {
            self.metrics.record_notification_failure(kind.as_str());
            warn!(
                error = %e,
                event_kind = kind.as_str(),
                identity = record.identity,
                "Failed to deliver shard event"
            );
        }
    }
}
