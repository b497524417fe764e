//! Transaction context consumed by the cache layer.
//!
//! The storage engine owns real transactions. Caches only need to know
//! whether a transaction is active, its commit timestamp once it commits,
//! and where its pending updates live.

use crate::error::{CacheError, Result};
use crate::types::{CacheId, Timestamp};
use crate::updates::UpdateQueue;
use std::any::Any;
use std::collections::HashMap;

/// Host transaction as seen by caches.
pub trait TransactionContext {
    fn is_active(&self) -> bool;

    /// Commit timestamp, or `None` while the transaction is not committing.
    fn commit_timestamp(&self) -> Option<Timestamp>;

    fn pending(&mut self) -> &mut PendingUpdates;
}

/// Update queues of one transaction, one per cache touched.
#[derive(Default)]
pub struct PendingUpdates {
    queues: HashMap<CacheId, Box<dyn Any + Send>>,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue for `cache`, created on first use.
    ///
    /// Fails if the queue was created for a different state type.
    pub fn queue<S: 'static>(&mut self, cache: CacheId) -> Result<&mut UpdateQueue<S>> {
        self.queues
            .entry(cache)
            .or_insert_with(|| Box::new(UpdateQueue::<S>::new()))
            .downcast_mut::<UpdateQueue<S>>()
            .ok_or_else(|| {
                CacheError::invalid_state(format!(
                    "update queue for cache {} holds a different state type",
                    cache
                ))
            })
    }

    /// Queue for `cache` if one exists.
    pub fn get<S: 'static>(&self, cache: CacheId) -> Option<&UpdateQueue<S>> {
        self.queues
            .get(&cache)
            .and_then(|q| q.downcast_ref::<UpdateQueue<S>>())
    }

    pub fn get_mut<S: 'static>(&mut self, cache: CacheId) -> Option<&mut UpdateQueue<S>> {
        self.queues
            .get_mut(&cache)
            .and_then(|q| q.downcast_mut::<UpdateQueue<S>>())
    }

    pub fn contains(&self, cache: CacheId) -> bool {
        self.queues.contains_key(&cache)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Idle,
    Active,
    Committing(Timestamp),
}

/// Minimal single-threaded transaction for hosts without their own.
///
/// Lifecycle: [`begin`](Transaction::begin), mutate caches,
/// [`prepare_commit`](Transaction::prepare_commit) with the commit
/// timestamp, commit the caches, then [`finish`](Transaction::finish).
/// [`rollback`](Transaction::rollback) discards everything queued.
pub struct Transaction {
    status: Status,
    pending: PendingUpdates,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            status: Status::Idle,
            pending: PendingUpdates::new(),
        }
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.status != Status::Idle {
            return Err(CacheError::invalid_state("transaction already started"));
        }
        self.status = Status::Active;
        Ok(())
    }

    /// Assign the commit timestamp. The transaction stays active until
    /// [`finish`](Transaction::finish).
    pub fn prepare_commit(&mut self, timestamp: Timestamp) -> Result<()> {
        if self.status != Status::Active {
            return Err(CacheError::invalid_state(
                "only an active transaction can commit",
            ));
        }
        self.status = Status::Committing(timestamp);
        Ok(())
    }

    /// End the transaction. Anything still queued is dropped.
    pub fn finish(&mut self) {
        self.pending.clear();
        self.status = Status::Idle;
    }

    pub fn rollback(&mut self) {
        self.finish();
    }
}

impl TransactionContext for Transaction {
    fn is_active(&self) -> bool {
        matches!(self.status, Status::Active | Status::Committing(_))
    }

    fn commit_timestamp(&self) -> Option<Timestamp> {
        match self.status {
            Status::Committing(ts) => Some(ts),
            _ => None,
        }
    }

    fn pending(&mut self) -> &mut PendingUpdates {
        &mut self.pending
    }
}
