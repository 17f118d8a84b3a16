//! NATS notification sink
//!
//! Publishes shard events to `{prefix}.{event_kind}` on core NATS.

use crate::error::ShardmanError;
use crate::notify::{NotificationSink, ShardEvent};
use async_nats::Client;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// NATS publisher for shard events
pub struct NatsSink {
    client: Client,
    subject_prefix: String,
}

impl NatsSink {
    /// Connect to NATS server
    pub async fn connect(servers: &str, subject_prefix: &str) -> Result<Arc<Self>, ShardmanError> {
        info!(servers, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| ShardmanError::NatsConnectionFailed(Box::new(e)))?;

        Ok(Arc::new(Self {
            client,
            subject_prefix: subject_prefix.to_string(),
        }))
    }

    /// Flush pending publishes before shutdown
    pub async fn close(&self) {
        info!("Closing NATS connection");
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS connection");
        }
    }
}

/// Subject an event is published on
fn subject_for(prefix: &str, event: &ShardEvent) -> String {
    format!("{}.{}", prefix, event.event_kind.as_str())
}

#[async_trait]
impl NotificationSink for NatsSink {
    async fn notify(&self, event: &ShardEvent) -> Result<(), ShardmanError> {
        let subject = subject_for(&self.subject_prefix, event);
        let payload = serde_json::to_vec(event).map_err(|source| {
            ShardmanError::SerializationFailed {
                event_kind: event.event_kind.as_str(),
                identity: event.identity,
                source,
            }
        })?;

        debug!(
            subject,
            event_id = %event.event_id,
            identity = event.identity,
            "Publishing shard event"
        );

        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| ShardmanError::NotificationFailed {
                event_kind: event.event_kind.as_str(),
                identity: event.identity,
                source: Box::new(e),
            })
    }
}
