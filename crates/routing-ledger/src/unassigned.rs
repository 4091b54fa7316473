//! Unassigned shard queue
//!
//! Copies with no node, plus the copies the scheduler looked at this pass
//! but could not place.

use std::cmp::Ordering;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::shard::{CopyId, ShardCopy};

/// Pending and ignored unassigned copies
///
/// Elements only leave `pending` through the ledger's unassigned cursor or
/// [`drain`](Self::drain), which keeps the primary counters exact.
#[derive(Debug, Clone, Default)]
pub struct UnassignedQueue {
    pending: Vec<ShardCopy>,
    ignored: Vec<ShardCopy>,
    primaries: usize,
    ignored_primaries: usize,
}

impl UnassignedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a copy to the pending list under a fresh handle
    ///
    /// A clone of a copy the ledger already holds becomes a distinct copy.
    pub fn add(&mut self, copy: ShardCopy) -> CopyId {
        let copy = copy.restamped();
        let id = copy.id();
        self.push(copy);
        id
    }

    /// Append a copy keeping its handle; the caller owns uniqueness
    pub(crate) fn push(&mut self, copy: ShardCopy) {
        if copy.is_primary() {
            self.primaries += 1;
        }
        self.pending.push(copy);
    }

    /// Stable sort of the pending list
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&ShardCopy, &ShardCopy) -> Ordering,
    {
        self.pending.sort_by(compare);
    }

    /// Randomize the pending order
    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rand::rng());
    }

    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.pending.shuffle(rng);
    }

    /// Pending copies in order
    pub fn iter(&self) -> impl Iterator<Item = &ShardCopy> {
        self.pending.iter()
    }

    pub fn ignored(&self) -> &[ShardCopy] {
        &self.ignored
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn ignored_len(&self) -> usize {
        self.ignored.len()
    }

    pub fn num_primaries(&self) -> usize {
        self.primaries
    }

    pub fn num_ignored_primaries(&self) -> usize {
        self.ignored_primaries
    }

    pub fn has_primaries(&self) -> bool {
        self.primaries > 0
    }

    /// Take every pending copy; ignored copies stay
    pub fn drain(&mut self) -> Vec<ShardCopy> {
        self.primaries = 0;
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn get(&self, pos: usize) -> Option<&ShardCopy> {
        self.pending.get(pos)
    }

    pub(crate) fn remove_at(&mut self, pos: usize) -> Option<ShardCopy> {
        if pos >= self.pending.len() {
            return None;
        }
        let copy = self.pending.remove(pos);
        if copy.is_primary() {
            self.primaries -= 1;
        }
        Some(copy)
    }

    pub(crate) fn ignore(&mut self, copy: ShardCopy) {
        if copy.is_primary() {
            self.ignored_primaries += 1;
        }
        self.ignored.push(copy);
    }

    /// Flip the primary flag of a pending or ignored copy; false if not held
    pub(crate) fn swap_primary(&mut self, id: CopyId) -> bool {
        if let Some(copy) = self.pending.iter_mut().find(|c| c.id() == id) {
            flip(copy, &mut self.primaries);
            return true;
        }
        if let Some(copy) = self.ignored.iter_mut().find(|c| c.id() == id) {
            flip(copy, &mut self.ignored_primaries);
            return true;
        }
        false
    }

    /// A pending or ignored copy by handle
    pub(crate) fn find(&self, id: CopyId) -> Option<&ShardCopy> {
        self.pending.iter().chain(self.ignored.iter()).find(|c| c.id() == id)
    }

    pub(crate) fn contains(&self, id: CopyId) -> bool {
        self.find(id).is_some()
    }
}

fn flip(copy: &mut ShardCopy, primaries: &mut usize) {
    if copy.is_primary() {
        *primaries -= 1;
    } else {
        *primaries += 1;
    }
    copy.swap_primary();
}
