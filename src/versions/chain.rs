//! Checkpoint-tagged snapshot chain.

use crate::error::{CacheError, Result};
use crate::types::{ChainStats, Checkpoint, SaveSummary, Timestamp};
use crate::updates::Update;

/// One snapshot of a cache's state.
///
/// Each node exclusively owns its older neighbour, so dropping a link drops
/// every snapshot behind it.
pub struct Version<S> {
    state: S,
    checkpoint: Option<Checkpoint>,
    previous: Option<Box<Version<S>>>,
}

impl<S> Version<S> {
    fn new(state: S) -> Self {
        Self {
            state,
            checkpoint: None,
            previous: None,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Checkpoint this snapshot belongs to. `None` until the first commit.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint
    }

    pub fn previous(&self) -> Option<&Version<S>> {
        self.previous.as_deref()
    }

    /// Whether a reader at `checkpoint` may use this snapshot.
    fn visible_at(&self, checkpoint: Checkpoint) -> bool {
        self.checkpoint
            .map_or(true, |cp| cp.timestamp() <= checkpoint.timestamp())
    }
}

impl<S> Drop for Version<S> {
    fn drop(&mut self) {
        // Unlink iteratively so a long chain cannot overflow the stack.
        let mut next = self.previous.take();
        while let Some(mut node) = next {
            next = node.previous.take();
        }
    }
}

/// Iterator over a chain, newest snapshot first.
pub struct Versions<'a, S> {
    next: Option<&'a Version<S>>,
}

impl<'a, S> Iterator for Versions<'a, S> {
    type Item = &'a Version<S>;

    fn next(&mut self) -> Option<Self::Item> {
        let version = self.next?;
        self.next = version.previous.as_deref();
        Some(version)
    }
}

/// The live head of a cache and the older snapshots still retained.
///
/// Checkpoints never increase from head to tail. Commits write through the
/// head and, depending on their timestamp, into older snapshots as well.
pub struct VersionChain<S> {
    head: Version<S>,
}

impl<S> VersionChain<S> {
    pub fn new(state: S) -> Self {
        Self {
            head: Version::new(state),
        }
    }

    pub fn head(&self) -> &Version<S> {
        &self.head
    }

    /// Current (head) state.
    pub fn state(&self) -> &S {
        &self.head.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut S {
        &mut self.head.state
    }

    pub(crate) fn replace_state(&mut self, state: S) {
        self.head.state = state;
    }

    pub fn iter(&self) -> Versions<'_, S> {
        Versions {
            next: Some(&self.head),
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn checkpoints(&self) -> Vec<Option<Checkpoint>> {
        self.iter().map(|v| v.checkpoint).collect()
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            versions: self.len(),
            head_checkpoint: self.head.checkpoint,
            oldest_checkpoint: self.iter().last().and_then(|v| v.checkpoint),
        }
    }

    /// Newest snapshot whose checkpoint is at or before `checkpoint`.
    ///
    /// `None` means no retained snapshot is old enough.
    pub fn version(&self, checkpoint: Checkpoint) -> Option<&Version<S>> {
        self.iter().find(|v| v.visible_at(checkpoint))
    }

    /// Bring the head up to the global checkpoint `current`.
    ///
    /// An unset head simply adopts `current`. If `current` is newer than the
    /// head's checkpoint, the head state is copied into a new snapshot
    /// pinned at the old checkpoint and the head moves to `current`.
    /// Returns whether a snapshot was forked.
    pub fn advance(&mut self, current: Checkpoint, copy: impl FnOnce(&S) -> S) -> bool {
        match self.head.checkpoint {
            None => {
                self.head.checkpoint = Some(current);
                false
            }
            Some(checkpoint) if current.timestamp() > checkpoint.timestamp() => {
                let forked = Version {
                    state: copy(&self.head.state),
                    checkpoint: Some(checkpoint),
                    previous: self.head.previous.take(),
                };
                self.head.previous = Some(Box::new(forked));
                self.head.checkpoint = Some(current);
                true
            }
            Some(_) => false,
        }
    }

    /// Apply a committed transaction's updates, head first.
    ///
    /// After each snapshot, the walk stops once `commit` is strictly greater
    /// than that snapshot's checkpoint. Returns the number of snapshots
    /// updated.
    pub fn apply(&mut self, updates: &[Box<dyn Update<S>>], commit: Timestamp) -> Result<usize>
    where
        S: 'static,
    {
        if self.head.checkpoint.is_none() {
            return Err(CacheError::invalid_state(
                "head snapshot has no checkpoint; advance the chain first",
            ));
        }

        let mut node = &mut self.head;
        let mut updated = 0;
        loop {
            for update in updates {
                update.apply(&mut node.state)?;
            }
            updated += 1;

            let stop = node
                .checkpoint
                .map_or(true, |cp| commit > cp.timestamp());
            if stop {
                break;
            }
            node = match node.previous.as_deref_mut() {
                Some(previous) => previous,
                None => break,
            };
        }
        Ok(updated)
    }

    /// Persist every snapshot at or before `target`, newest first, and drop
    /// everything older than the newest one persisted.
    ///
    /// `save` receives each snapshot's checkpoint and state. If any call
    /// fails the chain is left untouched, though earlier calls have run.
    pub fn save(
        &mut self,
        target: Checkpoint,
        mut save: impl FnMut(Checkpoint, &S) -> Result<()>,
    ) -> Result<SaveSummary> {
        let mut saved = Vec::new();
        let mut keep = 0;
        for (depth, version) in self.iter().enumerate() {
            let Some(checkpoint) = version.checkpoint else {
                continue;
            };
            if checkpoint.timestamp() <= target.timestamp() {
                save(checkpoint, &version.state)?;
                if saved.is_empty() {
                    keep = depth;
                }
                saved.push(checkpoint);
            }
        }
        if saved.is_empty() {
            return Ok(SaveSummary::default());
        }

        let mut node = &mut self.head;
        for _ in 0..keep {
            node = node
                .previous
                .as_deref_mut()
                .ok_or_else(|| CacheError::invalid_state("snapshot chain shorter than walked"))?;
        }
        let dropped = node.previous.take();
        let pruned = Versions {
            next: dropped.as_deref(),
        }
        .count();
        Ok(SaveSummary { saved, pruned })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OpCode;
    use crate::updates::UpdateArg;
    use std::any::Any;

    #[derive(Debug)]
    struct Add(i64);

    impl Update<i64> for Add {
        fn opcode(&self) -> OpCode {
            OpCode(1)
        }

        fn size(&self) -> usize {
            self.0.encoded_len()
        }

        fn write_arg(&self, out: &mut Vec<u8>) -> Result<()> {
            self.0.encode(out)
        }

        fn apply(&self, state: &mut i64) -> Result<()> {
            *state += self.0;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn add(delta: i64) -> Vec<Box<dyn Update<i64>>> {
        vec![Box::new(Add(delta))]
    }

    fn commit(chain: &mut VersionChain<i64>, current: u64, ts: u64, delta: i64) -> usize {
        chain.advance(Checkpoint::at(current), |s| *s);
        chain.apply(&add(delta), Timestamp(ts)).unwrap()
    }

    /// Chain with snapshots at 30 (head, 111), 20 (11) and 10 (1).
    fn three_layers() -> VersionChain<i64> {
        let mut chain = VersionChain::new(0);
        commit(&mut chain, 10, 5, 1);
        commit(&mut chain, 20, 21, 10);
        commit(&mut chain, 30, 31, 100);
        chain
    }

    fn states(chain: &VersionChain<i64>) -> Vec<i64> {
        chain.iter().map(|v| *v.state()).collect()
    }

    #[test]
    fn test_first_commit_adopts_checkpoint() {
        let mut chain = VersionChain::new(0i64);
        assert!(!chain.advance(Checkpoint::at(10), |s| *s));
        assert_eq!(chain.head().checkpoint(), Some(Checkpoint::at(10)));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_same_checkpoint_does_not_fork() {
        let mut chain = VersionChain::new(0i64);
        commit(&mut chain, 10, 11, 1);
        assert!(!chain.advance(Checkpoint::at(10), |s| *s));
        assert!(!chain.advance(Checkpoint::at(5), |s| *s));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_fork_preserves_pre_commit_state() {
        let mut chain = VersionChain::new(0i64);
        commit(&mut chain, 10, 11, 7);

        assert!(chain.advance(Checkpoint::at(20), |s| *s));
        assert_eq!(chain.apply(&add(3), Timestamp(21)).unwrap(), 1);

        assert_eq!(*chain.state(), 10);
        let old = chain.version(Checkpoint::at(10)).unwrap();
        assert_eq!(*old.state(), 7);
        assert_eq!(old.checkpoint(), Some(Checkpoint::at(10)));
    }

    #[test]
    fn test_early_commit_reaches_every_layer() {
        let mut chain = three_layers();
        assert_eq!(states(&chain), vec![111, 11, 1]);

        let updated = chain.apply(&add(1000), Timestamp(15)).unwrap();
        assert_eq!(updated, 3);
        assert_eq!(states(&chain), vec![1111, 1011, 1001]);
    }

    #[test]
    fn test_commit_stops_below_its_checkpoint() {
        let mut chain = three_layers();
        let updated = chain.apply(&add(5), Timestamp(25)).unwrap();
        assert_eq!(updated, 2);
        assert_eq!(states(&chain), vec![116, 16, 1]);
    }

    #[test]
    fn test_commit_equal_to_checkpoint_continues() {
        let mut chain = three_layers();
        let updated = chain.apply(&add(5), Timestamp(20)).unwrap();
        assert_eq!(updated, 3);
        assert_eq!(states(&chain), vec![116, 16, 6]);
    }

    #[test]
    fn test_apply_requires_checkpoint() {
        let mut chain = VersionChain::new(0i64);
        let err = chain.apply(&add(1), Timestamp(1)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidState(_)));
        assert_eq!(*chain.state(), 0);
    }

    #[test]
    fn test_version_lookup() {
        let chain = three_layers();
        let at = |ts| chain.version(Checkpoint::at(ts)).map(|v| *v.state());
        assert_eq!(at(35), Some(111));
        assert_eq!(at(30), Some(111));
        assert_eq!(at(25), Some(11));
        assert_eq!(at(10), Some(1));
        assert_eq!(at(9), None);
    }

    #[test]
    fn test_unset_head_visible_everywhere() {
        let chain = VersionChain::new(4i64);
        assert_eq!(chain.version(Checkpoint::at(0)).map(|v| *v.state()), Some(4));
    }

    #[test]
    fn test_save_prunes_older_snapshots() {
        let mut chain = three_layers();
        let mut saved = Vec::new();
        let summary = chain
            .save(Checkpoint::at(25), |cp, state| {
                saved.push((cp, *state));
                Ok(())
            })
            .unwrap();

        // Both qualifying snapshots are persisted, newest first.
        assert_eq!(saved, vec![(Checkpoint::at(20), 11), (Checkpoint::at(10), 1)]);
        assert_eq!(
            summary,
            SaveSummary {
                saved: vec![Checkpoint::at(20), Checkpoint::at(10)],
                pruned: 1,
            }
        );
        assert_eq!(summary.newest(), Some(Checkpoint::at(20)));
        assert_eq!(
            chain.checkpoints(),
            vec![Some(Checkpoint::at(30)), Some(Checkpoint::at(20))]
        );
        assert!(chain.version(Checkpoint::at(15)).is_none());
        assert_eq!(chain.version(Checkpoint::at(25)).map(|v| *v.state()), Some(11));
    }

    #[test]
    fn test_save_head_drops_whole_tail() {
        let mut chain = three_layers();
        let mut calls = 0;
        let summary = chain
            .save(Checkpoint::at(30), |_, _| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(summary.saved.len(), 3);
        assert_eq!(summary.pruned, 2);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_save_before_any_snapshot() {
        let mut chain = three_layers();
        let summary = chain
            .save(Checkpoint::at(5), |_, _| panic!("nothing qualifies"))
            .unwrap();
        assert_eq!(summary, SaveSummary::default());
        assert_eq!(chain.len(), 3);

        let mut fresh = VersionChain::new(0i64);
        assert_eq!(
            fresh.save(Checkpoint::at(100), |_, _| Ok(())).unwrap(),
            SaveSummary::default()
        );
    }

    #[test]
    fn test_failed_save_keeps_chain() {
        let mut chain = three_layers();
        let err = chain
            .save(Checkpoint::at(25), |_, _| {
                Err(CacheError::backing_store("disk full"))
            })
            .unwrap_err();
        assert!(matches!(err, CacheError::BackingStore(_)));
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_failure_on_older_snapshot_keeps_chain() {
        let mut chain = three_layers();
        let mut seen = Vec::new();
        let err = chain
            .save(Checkpoint::at(25), |cp, _| {
                seen.push(cp);
                if cp == Checkpoint::at(10) {
                    return Err(CacheError::backing_store("disk full"));
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, CacheError::BackingStore(_)));
        assert_eq!(seen, vec![Checkpoint::at(20), Checkpoint::at(10)]);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_save_skips_snapshots_after_target() {
        let mut chain = VersionChain::new(0i64);
        for (cp, delta) in [(10, 1), (20, 10), (30, 100), (40, 1000)] {
            commit(&mut chain, cp, cp + 1, delta);
        }
        let mut saved = Vec::new();
        let summary = chain
            .save(Checkpoint::at(35), |cp, state| {
                saved.push((cp, *state));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            saved,
            vec![(Checkpoint::at(30), 111), (Checkpoint::at(20), 11), (Checkpoint::at(10), 1)]
        );
        assert_eq!(summary.pruned, 2);
        assert_eq!(
            chain.checkpoints(),
            vec![Some(Checkpoint::at(40)), Some(Checkpoint::at(30))]
        );
        assert!(chain.version(Checkpoint::at(29)).is_none());
        assert_eq!(chain.version(Checkpoint::at(35)).map(|v| *v.state()), Some(111));
    }

    #[test]
    fn test_stats() {
        let chain = three_layers();
        let stats = chain.stats();
        assert_eq!(stats.versions, 3);
        assert_eq!(stats.head_checkpoint, Some(Checkpoint::at(30)));
        assert_eq!(stats.oldest_checkpoint, Some(Checkpoint::at(10)));
    }
}
