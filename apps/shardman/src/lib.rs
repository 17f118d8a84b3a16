//! Shardman - shard coordinator for Discord bot fleets
//!
//! Workers ask the coordinator for a shard identity, heartbeat while they
//! run, and are evicted when they go silent:
//! - Paces new connections to the upstream session-start rate limit
//! - Hands out the lowest free identity under a single coordination lock
//! - Sweeps dead shards in the background and frees their identity
//! - Lets a restarted worker reclaim its previous identity

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fleet;
pub mod metrics;
pub mod notify;
pub mod shard;

pub use coordinator::{ConnectGrant, Coordinator, CoordinatorConfig};
pub use error::ShardmanError;
