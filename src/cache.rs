//! Transactional caches.
//!
//! An application implements [`TransactionalCache`] to describe its state,
//! its update kinds and how that state is saved and loaded. [`Cache`] wraps
//! those hooks with the versioned protocol:
//!
//! - updates are queued in the running transaction ([`Cache::update`])
//! - commit applies them across the snapshot chain ([`Cache::commit`])
//! - readers pick the snapshot for their checkpoint ([`Cache::version`])
//! - checkpoints persist and prune the chain ([`Cache::save`])
//! - recovery replays the logged update stream ([`Cache::recover`])

use crate::error::{CacheError, Result};
use crate::txn::TransactionContext;
use crate::types::{
    CacheId, ChainStats, Checkpoint, CommitOutcome, OpCode, RecoverySummary, SaveSummary,
};
use crate::updates::{ArgReader, Enqueued, ReloadMarker, Update, UpdateRegistry};
use crate::versions::{Version, VersionChain};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

/// Application hooks for one cache instance.
pub trait TransactionalCache: Send + Sync + 'static {
    /// In-memory aggregate maintained by the cache.
    type State: Clone + Send + Sync + 'static;

    /// Globally unique id. Recovered update streams are routed by it, so it
    /// must be stable across restarts.
    fn cache_id(&self) -> CacheId;

    /// State of a freshly registered cache.
    fn initial_state(&self) -> Self::State;

    /// Register a decoder for every update kind this cache writes.
    fn register_updates(&self, registry: &mut UpdateRegistry<Self::State>) -> Result<()>;

    /// Deep copy used when a snapshot is forked.
    fn copy(&self, state: &Self::State) -> Self::State {
        state.clone()
    }

    /// Persist `state`, which is the snapshot as of `checkpoint`.
    fn save(&self, checkpoint: Checkpoint, state: &Self::State) -> Result<()>;

    /// Load the most recently saved state.
    fn load(&self) -> Result<Self::State>;
}

/// A registered cache: application hooks plus the snapshot chain.
pub struct Cache<C: TransactionalCache> {
    hooks: C,
    updates: UpdateRegistry<C::State>,
    chain: RwLock<VersionChain<C::State>>,
}

impl<C: TransactionalCache> Cache<C> {
    pub fn new(hooks: C) -> Result<Self> {
        let mut updates = UpdateRegistry::new();
        hooks.register_updates(&mut updates)?;
        let chain = VersionChain::new(hooks.initial_state());
        Ok(Self {
            hooks,
            updates,
            chain: RwLock::new(chain),
        })
    }

    pub fn id(&self) -> CacheId {
        self.hooks.cache_id()
    }

    pub fn hooks(&self) -> &C {
        &self.hooks
    }

    /// Queue `update` in the transaction, compacting against the previous
    /// update for this cache.
    pub fn update<U: Update<C::State>>(
        &self,
        txn: &mut dyn TransactionContext,
        update: U,
    ) -> Result<Enqueued> {
        self.enqueue(txn, Box::new(update))
    }

    fn enqueue(
        &self,
        txn: &mut dyn TransactionContext,
        update: Box<dyn Update<C::State>>,
    ) -> Result<Enqueued> {
        if !txn.is_active() {
            return Err(CacheError::invalid_state(format!(
                "cache {} may be updated only within a transaction",
                self.id()
            )));
        }
        if update.opcode().is_reload() && !update.is_reload_marker() {
            return Err(CacheError::invalid_state(
                "opcode 0 is reserved for the reload marker",
            ));
        }
        let queue = txn.pending().queue::<C::State>(self.id())?;
        Ok(queue.enqueue(update))
    }

    /// Number of updates the transaction has queued for this cache.
    pub fn pending_len(&self, txn: &mut dyn TransactionContext) -> usize {
        txn.pending()
            .get::<C::State>(self.id())
            .map_or(0, |q| q.len())
    }

    /// Serialized form of the transaction's queue, for the log writer.
    ///
    /// Returns `None` when nothing is queued.
    pub fn serialize_pending(&self, txn: &mut dyn TransactionContext) -> Result<Option<Vec<u8>>> {
        match txn.pending().get::<C::State>(self.id()) {
            Some(queue) if !queue.is_empty() => Ok(Some(queue.serialize()?)),
            _ => Ok(None),
        }
    }

    /// Apply the transaction's queued updates to the snapshot chain.
    ///
    /// `current` is the host's checkpoint at commit time. A commit whose
    /// updates fail part way may leave snapshots partially updated; the host
    /// must then recover from the log.
    pub fn commit(
        &self,
        txn: &mut dyn TransactionContext,
        current: Checkpoint,
    ) -> Result<CommitOutcome> {
        let id = self.id();
        let timestamp = txn.commit_timestamp();
        let queue = match txn.pending().get_mut::<C::State>(id) {
            Some(queue) if !queue.is_empty() => queue,
            _ => return Ok(CommitOutcome::NoChanges),
        };
        let timestamp = timestamp.ok_or_else(|| {
            CacheError::invalid_state(format!(
                "cache {} committed without a commit timestamp",
                id
            ))
        })?;
        let updates = queue.drain();

        let mut chain = self.chain.write();
        let forked = chain.advance(current, |state| self.hooks.copy(state));
        if forked {
            tracing::debug!(
                "cache {} forked snapshot, head now at checkpoint {}",
                id,
                current.timestamp()
            );
        }
        let versions_updated = chain.apply(&updates, timestamp)?;

        Ok(CommitOutcome::Applied {
            forked,
            versions_updated,
        })
    }

    /// Snapshot a reader at `checkpoint` should see.
    ///
    /// `None` means no retained snapshot is old enough. The returned guard
    /// holds the chain's read lock.
    pub fn version(
        &self,
        checkpoint: Checkpoint,
    ) -> Option<MappedRwLockReadGuard<'_, Version<C::State>>> {
        RwLockReadGuard::try_map(self.chain.read(), |chain| chain.version(checkpoint)).ok()
    }

    /// Run `f` against the live (head) state.
    pub fn read<R>(&self, f: impl FnOnce(&C::State) -> R) -> R {
        f(self.chain.read().state())
    }

    /// Copy of the live state.
    pub fn current_state(&self) -> C::State {
        self.read(|state| self.hooks.copy(state))
    }

    pub fn stats(&self) -> ChainStats {
        self.chain.read().stats()
    }

    pub fn checkpoints(&self) -> Vec<Option<Checkpoint>> {
        self.chain.read().checkpoints()
    }

    /// Persist every snapshot at or before `checkpoint`, drop the snapshots
    /// behind the newest one saved, and queue a reload marker in `txn` for
    /// each snapshot persisted.
    pub fn save(
        &self,
        txn: &mut dyn TransactionContext,
        checkpoint: Checkpoint,
    ) -> Result<SaveSummary> {
        if !txn.is_active() {
            return Err(CacheError::invalid_state(format!(
                "cache {} may be saved only within a transaction",
                self.id()
            )));
        }

        let summary = self
            .chain
            .write()
            .save(checkpoint, |cp, state| self.hooks.save(cp, state))?;

        for saved in &summary.saved {
            tracing::debug!(
                "cache {} saved snapshot at checkpoint {}",
                self.id(),
                saved.timestamp()
            );
            self.enqueue(txn, Box::new(ReloadMarker))?;
        }
        if summary.pruned > 0 {
            tracing::debug!("cache {} pruned {} older snapshots", self.id(), summary.pruned);
        }
        Ok(summary)
    }

    /// Replay a serialized update stream into the live state.
    ///
    /// A reload marker replaces the state with [`TransactionalCache::load`].
    /// Only the head is rebuilt; no snapshots are forked.
    pub fn recover(&self, stream: &[u8]) -> Result<RecoverySummary> {
        let id = self.id();
        let mut reader = ArgReader::new(stream);
        let mut summary = RecoverySummary::default();
        let mut chain = self.chain.write();

        while !reader.is_empty() {
            let offset = reader.position();
            let opcode = OpCode(reader.read_u8()?);
            if opcode.is_reload() {
                chain.replace_state(self.hooks.load()?);
                summary.reloads += 1;
                tracing::debug!("cache {} reloaded saved state at offset {}", id, offset);
                continue;
            }

            let update = self
                .updates
                .create_update(opcode, &mut reader)
                .map_err(|e| match e {
                    CacheError::CorruptLog { .. } => e,
                    other => CacheError::corrupt(offset, other.to_string()),
                })?;
            update.apply(chain.state_mut())?;
            summary.applied += 1;
        }

        Ok(summary)
    }
}
