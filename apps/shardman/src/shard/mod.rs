//! Shard records and their storage

mod record;
mod repository;

pub use record::{HeartbeatMetrics, ShardRecord};
pub use repository::{MemoryRepository, ShardRepository};
