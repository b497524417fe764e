//! Per-transaction queue of pending updates for one cache.

use super::record::{encode_update, Update};
use crate::error::Result;

/// What happened to a record passed to [`UpdateQueue::enqueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// The record and the previous tail cancelled each other; both are gone.
    Cancelled,
    /// The record was folded into the previous tail.
    Combined,
    /// The record was appended.
    Appended,
}

/// Ordered list of updates waiting for their transaction to commit.
///
/// Insertion order is application order. Each insert is first tested for
/// cancellation against the tail, then for combination.
pub struct UpdateQueue<S> {
    updates: Vec<Box<dyn Update<S>>>,
}

impl<S: 'static> Default for UpdateQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> UpdateQueue<S> {
    pub fn new() -> Self {
        Self {
            updates: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, update: Box<dyn Update<S>>) -> Enqueued {
        if let Some(last) = self.updates.last_mut() {
            if update.cancel(&**last) {
                self.updates.pop();
                return Enqueued::Cancelled;
            }
            if update.combine(&mut **last) {
                return Enqueued::Combined;
            }
        }
        self.updates.push(update);
        Enqueued::Appended
    }

    /// Take every queued update, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<Box<dyn Update<S>>> {
        std::mem::take(&mut self.updates)
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Update<S>> + '_ {
        self.updates.iter().map(|u| &**u)
    }

    /// Upper bound of the serialized size of the queue.
    pub fn encoded_len(&self) -> usize {
        self.updates.iter().map(|u| 1 + u.size()).sum()
    }

    /// Serialize every queued update as `opcode arg` records, in order.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        for update in &self.updates {
            encode_update(&**update, &mut out)?;
        }
        Ok(out)
    }
}

impl<S> std::fmt::Debug for UpdateQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.updates.iter()).finish()
    }
}
