//! # Transactional caches
//!
//! Checkpoint-versioned in-memory aggregates that stay consistent with a
//! write-ahead log without being rewritten on every commit.
//!
//! ## Core Concepts
//!
//! - **Updates**: Serializable mutations queued per transaction, with
//!   combine/cancel compaction on insert
//! - **Snapshot chain**: The live head plus older snapshots pinned at the
//!   checkpoints readers may still need
//! - **Commit**: Applies a transaction's updates to every snapshot its
//!   timestamp reaches, forking a snapshot when the checkpoint advances
//! - **Recovery**: Replays logged update streams, reloading saved state at
//!   each reload marker
//!
//! ## Example
//!
//! ```ignore
//! use txcache::{Cache, CacheRegistry, Checkpoint, Timestamp, Transaction};
//!
//! let registry = CacheRegistry::new();
//! let totals = Arc::new(Cache::new(Totals::default())?);
//! registry.register(totals.clone())?;
//!
//! let mut txn = Transaction::new();
//! txn.begin()?;
//! totals.update(&mut txn, AddTotal { delta: 5 })?;
//! txn.prepare_commit(Timestamp(12))?;
//! registry.journal_pending(&mut txn, &journal)?;
//! registry.commit(&mut txn, clock.current_checkpoint())?;
//! txn.finish();
//! ```

pub mod cache;
pub mod clock;
pub mod error;
pub mod journal;
pub mod registry;
pub mod txn;
pub mod types;
pub mod updates;
pub mod versions;

// Re-exports
pub use cache::{Cache, TransactionalCache};
pub use clock::TimestampAllocator;
pub use error::{CacheError, Result};
pub use journal::{JournalConfig, JournalEntry, UpdateJournal};
pub use registry::{CacheRegistry, JournalRecovery, RegisteredCache};
pub use txn::{PendingUpdates, Transaction, TransactionContext};
pub use types::*;
pub use updates::{
    encode_update, ArgReader, Enqueued, ReloadMarker, Serialized, Update, UpdateArg,
    UpdateQueue, UpdateRegistry, MAX_SEQUENCE_LEN,
};
pub use versions::{Version, VersionChain, Versions};
