//! Identity allocator
//!
//! Hands out the lowest identity in [0, total) not held by a live shard,
//! which keeps the fleet densely packed and makes reclaims predictable.

use crate::coordinator::lock::CoordinationGuard;
use crate::error::ShardmanError;
use std::collections::BTreeSet;

/// Lowest-free-slot identity allocator
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAllocator;

impl IdentityAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Pick the lowest free identity. Requires the coordination lock so two
    /// callers can never observe the same live set.
    pub fn allocate(
        &self,
        _guard: &CoordinationGuard<'_>,
        live: &[u32],
        total_shards: u32,
    ) -> Result<u32, ShardmanError> {
        let full = ShardmanError::FleetFull {
            live: live.len(),
            total: total_shards,
        };

        if live.len() >= total_shards as usize {
            return Err(full);
        }

        let taken: BTreeSet<u32> = live.iter().copied().collect();
        (0..total_shards)
            .find(|identity| !taken.contains(identity))
            .ok_or(full)
    }

    /// Identities in [0, total) with no live record
    pub fn missing_identities(&self, live: &[u32], total_shards: u32) -> BTreeSet<u32> {
        let taken: BTreeSet<u32> = live.iter().copied().collect();
        (0..total_shards)
            .filter(|identity| !taken.contains(identity))
            .collect()
    }
}
