//! Timestamp and checkpoint allocation.

use crate::types::{Checkpoint, Timestamp};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic timestamp source that also tracks the current checkpoint.
///
/// Commit timestamps and checkpoints share one sequence, so a checkpoint
/// orders exactly between the commits before and after it.
pub struct TimestampAllocator {
    timestamp: AtomicU64,
    checkpoint: RwLock<Checkpoint>,
}

impl Default for TimestampAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampAllocator {
    pub fn new() -> Self {
        Self::starting_at(Timestamp(0))
    }

    /// Resume after recovery from the highest timestamp seen in the log.
    pub fn starting_at(timestamp: Timestamp) -> Self {
        Self {
            timestamp: AtomicU64::new(timestamp.0),
            checkpoint: RwLock::new(Checkpoint::new(timestamp)),
        }
    }

    /// Allocate the next timestamp.
    pub fn update_timestamp(&self) -> Timestamp {
        Timestamp(self.timestamp.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current_timestamp(&self) -> Timestamp {
        Timestamp(self.timestamp.load(Ordering::SeqCst))
    }

    /// Allocate a timestamp and make it the current checkpoint.
    pub fn allocate_checkpoint(&self) -> Checkpoint {
        let mut current = self.checkpoint.write();
        let checkpoint = Checkpoint::new(self.update_timestamp());
        *current = checkpoint;
        checkpoint
    }

    pub fn current_checkpoint(&self) -> Checkpoint {
        *self.checkpoint.read()
    }
}
