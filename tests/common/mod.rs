//! Shared fixture: a ledger cache with a handful of update kinds and an
//! in-memory backing store.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use txcache::{
    Cache, CacheError, CacheId, Checkpoint, CommitOutcome, OpCode, Result, Serialized,
    Timestamp, Transaction, TransactionalCache, Update, UpdateArg, UpdateRegistry,
};

pub const LEDGER_ID: CacheId = CacheId(0x1ed9e7);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub total: i64,
    pub slots: BTreeMap<i32, i64>,
    pub notes: Vec<String>,
}

// --- Update kinds ---

/// Adds to the running total. Deposits combine, and opposite deposits cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deposit(pub i64);

impl Update<Ledger> for Deposit {
    fn opcode(&self) -> OpCode {
        OpCode(1)
    }

    fn size(&self) -> usize {
        self.0.encoded_len()
    }

    fn write_arg(&self, out: &mut Vec<u8>) -> Result<()> {
        self.0.encode(out)
    }

    fn apply(&self, state: &mut Ledger) -> Result<()> {
        state.total += self.0;
        Ok(())
    }

    fn combine(&self, previous: &mut dyn Update<Ledger>) -> bool {
        match previous.downcast_mut::<Deposit>() {
            Some(prev) => {
                prev.0 += self.0;
                true
            }
            None => false,
        }
    }

    fn cancel(&self, previous: &dyn Update<Ledger>) -> bool {
        previous
            .downcast_ref::<Deposit>()
            .map_or(false, |prev| prev.0 == -self.0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Increments one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bump(pub i32);

impl Update<Ledger> for Bump {
    fn opcode(&self) -> OpCode {
        OpCode(2)
    }

    fn size(&self) -> usize {
        self.0.encoded_len()
    }

    fn write_arg(&self, out: &mut Vec<u8>) -> Result<()> {
        self.0.encode(out)
    }

    fn apply(&self, state: &mut Ledger) -> Result<()> {
        *state.slots.entry(self.0).or_insert(0) += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Appends a note. Carried as a serialized argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note(pub String);

impl Update<Ledger> for Note {
    fn opcode(&self) -> OpCode {
        OpCode(3)
    }

    fn size(&self) -> usize {
        Serialized(self.0.clone()).encoded_len()
    }

    fn write_arg(&self, out: &mut Vec<u8>) -> Result<()> {
        Serialized(self.0.clone()).encode(out)
    }

    fn apply(&self, state: &mut Ledger) -> Result<()> {
        state.notes.push(self.0.clone());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Always fails to apply.
#[derive(Debug, Clone, Copy)]
pub struct Poison;

impl Update<Ledger> for Poison {
    fn opcode(&self) -> OpCode {
        OpCode(4)
    }

    fn size(&self) -> usize {
        0
    }

    fn write_arg(&self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn apply(&self, _state: &mut Ledger) -> Result<()> {
        Err(CacheError::InvalidState("poisoned update".into()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// --- Cache hooks ---

/// Ledger hooks backed by a shared in-memory store holding the newest saved
/// snapshot.
pub struct LedgerCache {
    id: CacheId,
    pub store: Arc<Mutex<Option<(Checkpoint, Ledger)>>>,
    pub fail_saves: AtomicBool,
    pub fail_loads: AtomicBool,
}

impl LedgerCache {
    pub fn new(id: CacheId) -> Self {
        Self::with_store(id, Arc::new(Mutex::new(None)))
    }

    pub fn with_store(id: CacheId, store: Arc<Mutex<Option<(Checkpoint, Ledger)>>>) -> Self {
        Self {
            id,
            store,
            fail_saves: AtomicBool::new(false),
            fail_loads: AtomicBool::new(false),
        }
    }

    pub fn saved(&self) -> Option<(Checkpoint, Ledger)> {
        self.store.lock().clone()
    }
}

impl TransactionalCache for LedgerCache {
    type State = Ledger;

    fn cache_id(&self) -> CacheId {
        self.id
    }

    fn initial_state(&self) -> Ledger {
        Ledger::default()
    }

    fn register_updates(&self, registry: &mut UpdateRegistry<Ledger>) -> Result<()> {
        registry.register(OpCode(1), Deposit)?;
        registry.register(OpCode(2), Bump)?;
        registry.register(OpCode(3), |arg: Serialized<String>| Note(arg.0))?;
        registry.register(OpCode(4), |_: ()| Poison)?;
        Ok(())
    }

    fn save(&self, checkpoint: Checkpoint, state: &Ledger) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CacheError::backing_store("ledger volume unavailable"));
        }
        // A save persists several snapshots newest first; keep the newest.
        let mut store = self.store.lock();
        if store.as_ref().map_or(true, |(stored, _)| *stored <= checkpoint) {
            *store = Some((checkpoint, state.clone()));
        }
        Ok(())
    }

    fn load(&self) -> Result<Ledger> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(CacheError::backing_store("ledger volume unavailable"));
        }
        Ok(self.store.lock().as_ref().map(|(_, s)| s.clone()).unwrap_or_default())
    }
}

pub fn ledger() -> Cache<LedgerCache> {
    Cache::new(LedgerCache::new(LEDGER_ID)).unwrap()
}

// --- Transaction helpers ---

/// Run one transaction against `cache`: queue with `f`, then commit at
/// `timestamp` while the host checkpoint is `current`.
pub fn commit_with(
    cache: &Cache<LedgerCache>,
    timestamp: u64,
    current: u64,
    f: impl FnOnce(&Cache<LedgerCache>, &mut Transaction),
) -> CommitOutcome {
    let mut txn = Transaction::new();
    txn.begin().unwrap();
    f(cache, &mut txn);
    txn.prepare_commit(Timestamp(timestamp)).unwrap();
    let outcome = cache.commit(&mut txn, Checkpoint::at(current)).unwrap();
    txn.finish();
    outcome
}

pub fn deposit(cache: &Cache<LedgerCache>, amount: i64, timestamp: u64, current: u64) -> CommitOutcome {
    commit_with(cache, timestamp, current, |c, txn| {
        c.update(txn, Deposit(amount)).unwrap();
    })
}

/// Total visible to a reader at `checkpoint`.
pub fn total_at(cache: &Cache<LedgerCache>, checkpoint: u64) -> Option<i64> {
    cache
        .version(Checkpoint::at(checkpoint))
        .map(|v| v.state().total)
}
