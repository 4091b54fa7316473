//! Lending cursors over the unassigned queue and a node's shard list
//!
//! Both borrow the ledger mutably for their lifetime and are not resumable
//! once dropped; a fresh cursor starts from the beginning.

use std::collections::VecDeque;

use tracing::debug;

use super::RoutingLedger;
use crate::error::{LedgerError, LedgerResult};
use crate::shard::{CopyId, NodeId, ShardCopy, UnassignedInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    At(usize),
    /// The element at this index was taken; the next one slid into its place
    Removed(usize),
}

/// Cursor over the pending unassigned copies
pub struct UnassignedCursor<'a> {
    ledger: &'a mut RoutingLedger,
    position: Position,
}

impl<'a> UnassignedCursor<'a> {
    pub(crate) fn new(ledger: &'a mut RoutingLedger) -> Self {
        Self {
            ledger,
            position: Position::BeforeFirst,
        }
    }

    /// Advance to the next pending copy
    pub fn next(&mut self) -> Option<&ShardCopy> {
        let pos = match self.position {
            Position::BeforeFirst => 0,
            Position::At(pos) => pos + 1,
            Position::Removed(pos) => pos,
        };
        self.position = Position::At(pos);
        self.ledger.unassigned.get(pos)
    }

    pub fn current(&self) -> Option<&ShardCopy> {
        match self.position {
            Position::At(pos) => self.ledger.unassigned.get(pos),
            _ => None,
        }
    }

    fn current_pos(&self) -> LedgerResult<usize> {
        match self.position {
            Position::At(pos) if pos < self.ledger.unassigned.len() => Ok(pos),
            _ => Err(LedgerError::NoCurrentElement),
        }
    }

    /// Take the current copy out of the queue and initialize it on `node_id`
    pub fn initialize(
        &mut self,
        node_id: &str,
        allocation_id: Option<String>,
        expected_size: Option<u64>,
    ) -> LedgerResult<CopyId> {
        self.ledger.ensure_mutable()?;
        let pos = self.current_pos()?;
        let copy = self.ledger.unassigned.get(pos).ok_or(LedgerError::NoCurrentElement)?;
        self.ledger.check_initialize(copy, node_id)?;

        let copy = self
            .ledger
            .unassigned
            .remove_at(pos)
            .ok_or(LedgerError::NoCurrentElement)?;
        self.position = Position::Removed(pos);
        self.ledger.assign_initializing(copy, node_id, allocation_id, expected_size)
    }

    /// Set the current copy aside until the next pass
    pub fn remove_and_ignore(&mut self) -> LedgerResult<()> {
        self.ledger.ensure_mutable()?;
        let pos = self.current_pos()?;
        let copy = self
            .ledger
            .unassigned
            .remove_at(pos)
            .ok_or(LedgerError::NoCurrentElement)?;
        self.position = Position::Removed(pos);
        debug!("Ignoring unassigned {} ({}) for this pass", copy.shard_id(), copy.id());
        self.ledger.unassigned.ignore(copy);
        self.ledger.verify();
        Ok(())
    }
}

/// Cursor over the copies of one node
///
/// Iterates the copies present when the cursor was created. Copies removed
/// in the meantime as a side effect of an earlier removal are skipped.
pub struct NodeCursor<'a> {
    ledger: &'a mut RoutingLedger,
    node_id: NodeId,
    pending: VecDeque<CopyId>,
    current: Option<CopyId>,
    removed: Option<ShardCopy>,
    queued: bool,
}

impl<'a> NodeCursor<'a> {
    pub(crate) fn new(ledger: &'a mut RoutingLedger, node_id: NodeId, pending: Vec<CopyId>) -> Self {
        Self {
            ledger,
            node_id,
            pending: pending.into(),
            current: None,
            removed: None,
            queued: false,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Advance to the next copy still on this node
    pub fn next(&mut self) -> Option<&ShardCopy> {
        self.current = None;
        self.removed = None;
        self.queued = false;
        while let Some(id) = self.pending.pop_front() {
            if self.ledger.locations.get(&id) == Some(&self.node_id) {
                self.current = Some(id);
                break;
            }
        }
        self.current.and_then(|id| self.ledger.lookup(id))
    }

    /// The current copy; after removal, the copy as it was removed
    pub fn current(&self) -> Option<&ShardCopy> {
        if let Some(removed) = &self.removed {
            return Some(removed);
        }
        self.current.and_then(|id| self.ledger.lookup(id))
    }

    /// Whether the current copy was already removed this step
    pub fn is_removed(&self) -> bool {
        self.removed.is_some()
    }

    /// Remove the current copy with all ledger side effects
    pub fn remove(&mut self) -> LedgerResult<&ShardCopy> {
        self.ledger.ensure_mutable()?;
        if self.removed.is_some() {
            return Err(LedgerError::NoCurrentElement);
        }
        let id = self.current.ok_or(LedgerError::NoCurrentElement)?;
        let removed = self.ledger.remove_assigned(id)?;
        self.ledger.verify();
        Ok(&*self.removed.insert(removed))
    }

    /// Remove the current copy (unless already removed) and queue an
    /// unassigned clone of it
    ///
    /// Returns the handle of the queued copy, `None` for a relocation target.
    pub fn move_to_unassigned(&mut self, info: UnassignedInfo) -> LedgerResult<Option<CopyId>> {
        self.ledger.ensure_mutable()?;
        if self.queued {
            return Err(LedgerError::NoCurrentElement);
        }
        if self.removed.is_none() {
            let id = self.current.ok_or(LedgerError::NoCurrentElement)?;
            let removed = self.ledger.remove_assigned(id)?;
            self.removed = Some(removed);
        }
        let queued = match &self.removed {
            Some(removed) => self.ledger.requeue(removed, info),
            None => return Err(LedgerError::NoCurrentElement),
        };
        self.queued = true;
        self.ledger.verify();
        Ok(queued)
    }
}

impl RoutingLedger {
    /// Cursor over the pending unassigned copies
    pub fn unassigned_cursor(&mut self) -> UnassignedCursor<'_> {
        UnassignedCursor::new(self)
    }

    /// Cursor over the copies currently on `node_id`
    pub fn node_cursor(&mut self, node_id: &str) -> LedgerResult<NodeCursor<'_>> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| LedgerError::IllegalArgument(format!("unknown node {}", node_id)))?;
        let pending = node.copy_ids();
        let node_id = node.node_id().clone();
        Ok(NodeCursor::new(self, node_id, pending))
    }
}
