//! Registry of the caches attached to one storage engine.
//!
//! The host passes the registry into its commit, checkpoint and recovery
//! paths. It fans each call out to every registered cache and routes
//! recovered journal entries by [`CacheId`].

use crate::cache::{Cache, TransactionalCache};
use crate::error::{CacheError, Result};
use crate::journal::{JournalEntry, UpdateJournal};
use crate::txn::TransactionContext;
use crate::types::{
    CacheId, ChainStats, Checkpoint, CommitOutcome, RecoverySummary, SaveSummary, Timestamp,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// Type-erased view of a [`Cache`], so caches with different state types can
/// share one registry.
pub trait RegisteredCache: Send + Sync {
    fn cache_id(&self) -> CacheId;

    fn commit(
        &self,
        txn: &mut dyn TransactionContext,
        current: Checkpoint,
    ) -> Result<CommitOutcome>;

    fn save(&self, txn: &mut dyn TransactionContext, checkpoint: Checkpoint)
        -> Result<SaveSummary>;

    fn recover(&self, stream: &[u8]) -> Result<RecoverySummary>;

    fn serialize_pending(&self, txn: &mut dyn TransactionContext) -> Result<Option<Vec<u8>>>;

    fn stats(&self) -> ChainStats;
}

impl<C: TransactionalCache> RegisteredCache for Cache<C> {
    fn cache_id(&self) -> CacheId {
        self.id()
    }

    fn commit(
        &self,
        txn: &mut dyn TransactionContext,
        current: Checkpoint,
    ) -> Result<CommitOutcome> {
        Cache::commit(self, txn, current)
    }

    fn save(
        &self,
        txn: &mut dyn TransactionContext,
        checkpoint: Checkpoint,
    ) -> Result<SaveSummary> {
        Cache::save(self, txn, checkpoint)
    }

    fn recover(&self, stream: &[u8]) -> Result<RecoverySummary> {
        Cache::recover(self, stream)
    }

    fn serialize_pending(&self, txn: &mut dyn TransactionContext) -> Result<Option<Vec<u8>>> {
        Cache::serialize_pending(self, txn)
    }

    fn stats(&self) -> ChainStats {
        Cache::stats(self)
    }
}

/// Outcome of replaying a journal through the registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JournalRecovery {
    pub entries: u64,
    /// Entries whose cache is not registered.
    pub skipped: u64,
    pub updates: RecoverySummary,
    /// Highest commit timestamp seen, for resuming the timestamp allocator.
    pub last_timestamp: Option<Timestamp>,
}

/// Caches registered with one engine, in registration order.
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<Vec<Arc<dyn RegisteredCache>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache. Ids must be unique.
    pub fn register(&self, cache: Arc<dyn RegisteredCache>) -> Result<()> {
        let mut caches = self.caches.write();
        let id = cache.cache_id();
        if caches.iter().any(|c| c.cache_id() == id) {
            return Err(CacheError::CacheExists(id));
        }
        caches.push(cache);
        Ok(())
    }

    pub fn get(&self, id: CacheId) -> Option<Arc<dyn RegisteredCache>> {
        self.caches
            .read()
            .iter()
            .find(|c| c.cache_id() == id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<CacheId> {
        self.caches.read().iter().map(|c| c.cache_id()).collect()
    }

    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn RegisteredCache>> {
        self.caches.read().clone()
    }

    /// Write every non-empty pending queue of `txn` to the journal.
    ///
    /// Call before [`commit`](CacheRegistry::commit). Returns the number of
    /// entries written.
    pub fn journal_pending(
        &self,
        txn: &mut dyn TransactionContext,
        journal: &UpdateJournal,
    ) -> Result<usize> {
        let timestamp = txn.commit_timestamp().ok_or_else(|| {
            CacheError::invalid_state("journal requires a commit timestamp")
        })?;

        let mut written = 0;
        for cache in self.snapshot() {
            if let Some(updates) = cache.serialize_pending(txn)? {
                journal.append(&JournalEntry {
                    cache_id: cache.cache_id(),
                    commit_timestamp: timestamp,
                    updates,
                })?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Commit `txn` into every registered cache.
    ///
    /// The transaction's pending updates are cleared afterwards whether or not
    /// any cache changed. Returns the number of caches that applied updates.
    pub fn commit(&self, txn: &mut dyn TransactionContext, current: Checkpoint) -> Result<usize> {
        let mut changed = 0;
        for cache in self.snapshot() {
            if cache.commit(txn, current)?.is_applied() {
                changed += 1;
            }
        }
        txn.pending().clear();
        Ok(changed)
    }

    /// Checkpoint callback: save every cache at `checkpoint`.
    pub fn save(
        &self,
        txn: &mut dyn TransactionContext,
        checkpoint: Checkpoint,
    ) -> Result<Vec<(CacheId, SaveSummary)>> {
        self.snapshot()
            .into_iter()
            .map(|cache| Ok((cache.cache_id(), cache.save(txn, checkpoint)?)))
            .collect()
    }

    /// Replay a single recovered update stream into the cache that wrote it.
    pub fn recover_stream(&self, id: CacheId, stream: &[u8]) -> Result<RecoverySummary> {
        let cache = self.get(id).ok_or(CacheError::CacheNotRegistered(id))?;
        cache.recover(stream)
    }

    /// Replay every journal entry, in order, into its cache.
    ///
    /// Entries for caches that are no longer registered are skipped.
    pub fn recover(&self, journal: &UpdateJournal) -> Result<JournalRecovery> {
        let mut result = JournalRecovery::default();
        for entry in journal.entries()? {
            result.entries += 1;
            result.last_timestamp = result.last_timestamp.max(Some(entry.commit_timestamp));
            match self.get(entry.cache_id) {
                Some(cache) => result.updates.absorb(cache.recover(&entry.updates)?),
                None => {
                    tracing::warn!(
                        "skipping journal entry for unregistered cache {}",
                        entry.cache_id
                    );
                    result.skipped += 1;
                }
            }
        }
        tracing::info!(
            "recovered {} journal entries ({} updates, {} reloads, {} skipped)",
            result.entries,
            result.updates.applied,
            result.updates.reloads,
            result.skipped
        );
        Ok(result)
    }

    pub fn stats(&self) -> Vec<(CacheId, ChainStats)> {
        self.snapshot()
            .iter()
            .map(|c| (c.cache_id(), c.stats()))
            .collect()
    }
}
