//! Shard record storage
//!
//! The coordinator only talks to storage through [`ShardRepository`].
//! [`MemoryRepository`] is the in-process implementation.

use crate::error::ShardmanError;
use crate::shard::record::ShardRecord;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Keyed storage of shard records
#[async_trait]
pub trait ShardRepository: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if its identity is already live.
    async fn insert(&self, record: ShardRecord) -> Result<(), ShardmanError>;

    /// Replace the record with the same session token.
    /// Fails with `SessionNotFound` if the session no longer exists.
    async fn update(&self, record: ShardRecord) -> Result<(), ShardmanError>;

    /// Remove a session, returning the removed record
    async fn delete(&self, session_token: &str) -> Result<Option<ShardRecord>, ShardmanError>;

    /// Remove a session only if it is still expired as of `now`.
    /// The check and the removal are one atomic step against `update`.
    async fn delete_if_expired(
        &self,
        session_token: &str,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Option<ShardRecord>, ShardmanError>;

    async fn find_by_session(&self, session_token: &str)
        -> Result<Option<ShardRecord>, ShardmanError>;

    async fn find_by_identity(&self, identity: u32) -> Result<Option<ShardRecord>, ShardmanError>;

    /// Snapshot of every live record, ordered by identity
    async fn list_all(&self) -> Result<Vec<ShardRecord>, ShardmanError>;
}

/// In-memory repository backed by two concurrent maps
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<MemoryRepositoryInner>,
}

#[derive(Debug, Default)]
struct MemoryRepositoryInner {
    /// session_token -> record
    sessions: DashMap<String, ShardRecord>,
    /// identity -> session_token
    identities: DashMap<u32, String>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }
}

#[async_trait]
impl ShardRepository for MemoryRepository {
    async fn insert(&self, record: ShardRecord) -> Result<(), ShardmanError> {
        match self.inner.identities.entry(record.identity) {
            Entry::Occupied(_) => Err(ShardmanError::Conflict {
                identity: record.identity,
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.session_token.clone());
                self.inner
                    .sessions
                    .insert(record.session_token.clone(), record);
                Ok(())
            }
        }
    }

    async fn update(&self, record: ShardRecord) -> Result<(), ShardmanError> {
        let mut entry = self
            .inner
            .sessions
            .get_mut(&record.session_token)
            .ok_or_else(|| ShardmanError::SessionNotFound {
                session_token: record.session_token.clone(),
            })?;

        if entry.identity != record.identity {
            return Err(ShardmanError::Conflict {
                identity: record.identity,
            });
        }

        *entry = record;
        Ok(())
    }

    async fn delete(&self, session_token: &str) -> Result<Option<ShardRecord>, ShardmanError> {
        let Some((_, record)) = self.inner.sessions.remove(session_token) else {
            return Ok(None);
        };

        self.inner
            .identities
            .remove_if(&record.identity, |_, token| token == session_token);

        Ok(Some(record))
    }

    async fn delete_if_expired(
        &self,
        session_token: &str,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Option<ShardRecord>, ShardmanError> {
        let Some((_, record)) = self
            .inner
            .sessions
            .remove_if(session_token, |_, record| record.is_expired(now, timeout))
        else {
            return Ok(None);
        };

        self.inner
            .identities
            .remove_if(&record.identity, |_, token| token == session_token);

        Ok(Some(record))
    }

    async fn find_by_session(
        &self,
        session_token: &str,
    ) -> Result<Option<ShardRecord>, ShardmanError> {
        Ok(self
            .inner
            .sessions
            .get(session_token)
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_identity(&self, identity: u32) -> Result<Option<ShardRecord>, ShardmanError> {
        let Some(token) = self
            .inner
            .identities
            .get(&identity)
            .map(|entry| entry.value().clone())
        else {
            return Ok(None);
        };

        self.find_by_session(&token).await
    }

    async fn list_all(&self) -> Result<Vec<ShardRecord>, ShardmanError> {
        let mut records: Vec<ShardRecord> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.identity);
        Ok(records)
    }
}
