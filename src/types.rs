//! Core types shared by the cache layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Commit or checkpoint timestamp assigned by the host.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ts({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recovery boundary. Checkpoints are ordered by their timestamp.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    timestamp: Timestamp,
}

impl Checkpoint {
    pub fn new(timestamp: Timestamp) -> Self {
        Self { timestamp }
    }

    pub fn at(timestamp: u64) -> Self {
        Self::new(Timestamp(timestamp))
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checkpoint({})", self.timestamp.0)
    }
}

/// Globally unique identifier of a cache instance.
///
/// Used to route recovered update streams to the cache that wrote them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheId(pub u64);

impl fmt::Debug for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheId({:#x})", self.0)
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Operation code of an update record.
///
/// Zero is reserved for the reload marker.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpCode(pub u8);

impl OpCode {
    pub const RELOAD: OpCode = OpCode(0);

    pub fn is_reload(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpCode({})", self.0)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of committing one cache's pending updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The transaction queued nothing for this cache.
    NoChanges,
    /// Updates were applied to `versions_updated` snapshots, newest first.
    Applied {
        forked: bool,
        versions_updated: usize,
    },
}

impl CommitOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommitOutcome::Applied { .. })
    }
}

/// Result of saving a cache at a checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveSummary {
    /// Checkpoints of the snapshots handed to the save hook, newest first.
    pub saved: Vec<Checkpoint>,
    /// Number of older snapshots dropped from the chain.
    pub pruned: usize,
}

impl SaveSummary {
    /// Newest saved snapshot, which is now the oldest one retained.
    pub fn newest(&self) -> Option<Checkpoint> {
        self.saved.first().copied()
    }
}

/// Result of replaying an update stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub applied: u64,
    pub reloads: u64,
}

impl RecoverySummary {
    pub(crate) fn absorb(&mut self, other: RecoverySummary) {
        self.applied += other.applied;
        self.reloads += other.reloads;
    }
}

/// Shape of a cache's snapshot chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub versions: usize,
    pub head_checkpoint: Option<Checkpoint>,
    pub oldest_checkpoint: Option<Checkpoint>,
}
