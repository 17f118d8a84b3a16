//! Prometheus metrics module
//!
//! Recording goes through the `metrics` facade and is a no-op until the
//! binary installs the Prometheus recorder.

use crate::error::ShardmanError;
use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and register metric descriptions.
///
/// Must be called at most once per process.
pub fn install_prometheus() -> Result<PrometheusHandle, ShardmanError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ShardmanError::Config(format!("failed to install Prometheus recorder: {e}")))?;

    ShardmanMetrics::register_metrics();
    Ok(handle)
}

/// Shard coordinator metrics recorder
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardmanMetrics;

impl ShardmanMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "shardman_admissions_total",
            Unit::Count,
            "Shards admitted through connect"
        );
        describe_counter!(
            "shardman_admissions_throttled_total",
            Unit::Count,
            "Admissions deferred by one window"
        );
        describe_counter!(
            "shardman_reregistrations_total",
            Unit::Count,
            "Shards that reclaimed an identity"
        );
        describe_counter!(
            "shardman_heartbeats_total",
            Unit::Count,
            "Heartbeats accepted"
        );
        describe_counter!(
            "shardman_evictions_total",
            Unit::Count,
            "Shards evicted by the liveness sweep"
        );
        describe_counter!(
            "shardman_disconnects_total",
            Unit::Count,
            "Explicit disconnects"
        );
        describe_counter!(
            "shardman_notification_failures_total",
            Unit::Count,
            "Shard events the sink failed to deliver"
        );
        describe_counter!(
            "shardman_errors_total",
            Unit::Count,
            "Coordinator errors by type"
        );

        describe_gauge!(
            "shardman_live_shards",
            Unit::Count,
            "Shards with a live record"
        );
        describe_gauge!(
            "shardman_total_shards",
            Unit::Count,
            "Fleet size from metadata"
        );
    }

    /// Record an admission through connect
    pub fn record_admission(&self, throttled: bool) {
        counter!("shardman_admissions_total").increment(1);
        if throttled {
            counter!("shardman_admissions_throttled_total").increment(1);
        }
    }

    pub fn record_reregistration(&self) {
        counter!("shardman_reregistrations_total").increment(1);
    }

    pub fn record_heartbeat(&self) {
        counter!("shardman_heartbeats_total").increment(1);
    }

    pub fn record_eviction(&self) {
        counter!("shardman_evictions_total").increment(1);
    }

    pub fn record_disconnect(&self) {
        counter!("shardman_disconnects_total").increment(1);
    }

    pub fn record_notification_failure(&self, event_kind: &'static str) {
        counter!(
            "shardman_notification_failures_total",
            "event_kind" => event_kind
        )
        .increment(1);
    }

    /// Record coordinator error
    pub fn record_error(&self, error_type: &'static str) {
        counter!(
            "shardman_errors_total",
            "error_type" => error_type
        )
        .increment(1);
    }

    /// Set live shard and fleet size gauges
    pub fn set_fleet(&self, live: usize, total: u32) {
        gauge!("shardman_live_shards").set(live as f64);
        gauge!("shardman_total_shards").set(f64::from(total));
    }
}
