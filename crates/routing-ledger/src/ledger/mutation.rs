//! Ledger mutation operations
//!
//! Every public operation checks all of its preconditions before touching
//! any state, so a returned error leaves the ledger unchanged.

use std::collections::BTreeSet;

use tracing::debug;

use super::RoutingLedger;
use crate::error::{LedgerError, LedgerResult};
use crate::recovery::{find_primary, serves_replica_recoveries, RecoveryChange, RecoveryContext};
use crate::shard::{CopyId, ShardCopy, ShardId, UnassignedInfo, UnassignedReason};
use crate::transition::{CopyFacts, Transition};

impl RoutingLedger {
    /// Assign an unassigned copy to a node
    ///
    /// The copy must not be held by this ledger already; pending copies are
    /// initialized through [`UnassignedCursor::initialize`](super::UnassignedCursor::initialize).
    pub fn initialize(
        &mut self,
        copy: ShardCopy,
        node_id: &str,
        allocation_id: Option<String>,
        expected_size: Option<u64>,
    ) -> LedgerResult<CopyId> {
        self.ensure_mutable()?;
        if self.locations.contains_key(&copy.id()) || self.unassigned.contains(copy.id()) {
            return Err(LedgerError::IllegalArgument(format!(
                "copy {} of {} is already held by the ledger",
                copy.id(),
                copy.shard_id()
            )));
        }
        self.check_initialize(&copy, node_id)?;
        self.assign_initializing(copy, node_id, allocation_id, expected_size)
    }

    pub(crate) fn check_initialize(&self, copy: &ShardCopy, node_id: &str) -> LedgerResult<()> {
        if !copy.is_unassigned() {
            return Err(copy.illegal_state("UNASSIGNED"));
        }
        if self.locations.contains_key(&copy.id()) {
            return Err(LedgerError::IllegalArgument(format!(
                "copy {} of {} is already assigned",
                copy.id(),
                copy.shard_id()
            )));
        }
        self.check_target_node(copy.shard_id(), node_id)?;
        let assigned = self.assigned_shards(copy.shard_id());
        if copy.is_primary() {
            if assigned.iter().any(|c| c.is_primary() && !c.is_relocation_target()) {
                return Err(LedgerError::IllegalArgument(format!(
                    "{} already has an assigned primary",
                    copy.shard_id()
                )));
            }
        } else if find_primary(&assigned).is_none() {
            return Err(LedgerError::NoPrimaryForRecovery(copy.shard_id().clone()));
        }
        Ok(())
    }

    /// A node can hold at most one copy of a shard
    fn check_target_node(&self, shard_id: &ShardId, node_id: &str) -> LedgerResult<()> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| LedgerError::IllegalArgument(format!("unknown node {}", node_id)))?;
        if node.get_by_shard_id(shard_id).is_some() {
            return Err(LedgerError::IllegalArgument(format!(
                "node {} already holds a copy of {}",
                node_id, shard_id
            )));
        }
        Ok(())
    }

    /// UNASSIGNED -> INITIALIZING once [`check_initialize`](Self::check_initialize) passed
    pub(crate) fn assign_initializing(
        &mut self,
        mut copy: ShardCopy,
        node_id: &str,
        allocation_id: Option<String>,
        expected_size: Option<u64>,
    ) -> LedgerResult<CopyId> {
        copy.initialize(node_id.to_string(), allocation_id, expected_size)?;
        let primary = copy.is_primary();
        let shard_id = copy.shard_id().clone();
        let id = self.place(copy)?;
        self.counters.apply(Transition::Initialize { primary })?;
        self.update_recovery(id, RecoveryChange::Register, RecoveryContext::Live)?;

        // Replicas that were recovering without any primary now stream from this one
        if primary {
            let orphans = self
                .assigned_shards(&shard_id)
                .iter()
                .filter(|c| c.is_initial_replica_recovery())
                .count() as i64;
            if orphans > 0 {
                self.recoveries.adjust_outgoing(&node_id.to_string(), orphans)?;
            }
        }

        debug!("Initialized {} {} on {}", shard_id, if primary { "primary" } else { "replica" }, node_id);
        self.verify();
        Ok(id)
    }

    /// Start relocating a STARTED copy; returns the handle of the new target copy
    pub fn relocate(&mut self, id: CopyId, target_node: &str, expected_size: Option<u64>) -> LedgerResult<CopyId> {
        self.ensure_mutable()?;
        let copy = self.require_assigned(id)?;
        if !copy.is_started() {
            return Err(copy.illegal_state("STARTED"));
        }
        if copy.current_node().map(String::as_str) == Some(target_node) {
            return Err(LedgerError::IllegalArgument(format!(
                "cannot relocate {} to its own node {}",
                copy.shard_id(),
                target_node
            )));
        }
        self.check_target_node(copy.shard_id(), target_node)?;

        let source = self.lookup_mut(id).ok_or(LedgerError::UnknownCopy(id))?;
        source.relocate(target_node.to_string(), expected_size)?;
        let target = source.build_relocation_target()?;
        let shard_id = target.shard_id().clone();
        self.counters.apply(Transition::Relocate)?;
        let target_id = self.place(target)?;
        self.update_recovery(target_id, RecoveryChange::Register, RecoveryContext::Live)?;

        debug!("Relocating {} to {}", shard_id, target_node);
        self.verify();
        Ok(target_id)
    }

    /// Mark an INITIALIZING copy as STARTED
    ///
    /// For a relocation target the source copy is removed, completing the
    /// relocation.
    pub fn started(&mut self, id: CopyId) -> LedgerResult<()> {
        self.ensure_mutable()?;
        let copy = self.require_assigned(id)?;
        if !copy.is_initializing() {
            return Err(copy.illegal_state("INITIALIZING"));
        }
        let before = CopyFacts::of(copy);
        let source = if copy.is_relocation_target() {
            self.relocation_counterpart(copy)
        } else {
            None
        };

        self.update_recovery(id, RecoveryChange::Complete, RecoveryContext::Live)?;
        if let Some(source_id) = source {
            let source = self.discard(source_id)?;
            debug!(
                "Relocation of {} from {} completed",
                source.shard_id(),
                source.current_node().map(String::as_str).unwrap_or("null")
            );
        }
        let copy = self.lookup_mut(id).ok_or(LedgerError::UnknownCopy(id))?;
        copy.move_to_started()?;
        let shard_id = copy.shard_id().clone();
        self.counters.apply(Transition::Start { before })?;

        debug!("Started {} ({})", shard_id, id);
        self.verify();
        Ok(())
    }

    /// Cancel the relocation of a RELOCATING copy, removing its target
    pub fn cancel_relocation(&mut self, id: CopyId) -> LedgerResult<()> {
        self.ensure_mutable()?;
        let copy = self.require_assigned(id)?;
        if !copy.is_relocating() {
            return Err(copy.illegal_state("RELOCATING"));
        }
        self.cancel_relocation_of(id)?;
        self.verify();
        Ok(())
    }

    fn cancel_relocation_of(&mut self, id: CopyId) -> LedgerResult<()> {
        let copy = self.require_assigned(id)?;
        if let Some(target_id) = self.relocation_counterpart(copy) {
            self.discard(target_id)?;
        }
        let copy = self.lookup_mut(id).ok_or(LedgerError::UnknownCopy(id))?;
        copy.cancel_relocation()?;
        let shard_id = copy.shard_id().clone();
        self.counters.apply(Transition::CancelRelocation)?;
        debug!("Cancelled relocation of {} ({})", shard_id, id);
        Ok(())
    }

    /// Toggle the primary flag of each copy
    ///
    /// Relocating copies cannot change role, and a handle may appear only
    /// once. A swap that would leave a shard with two primaries, or with
    /// recovering replicas and no primary, is rejected.
    pub fn swap_primary_flag(&mut self, ids: &[CopyId]) -> LedgerResult<()> {
        self.ensure_mutable()?;
        let mut swapped: BTreeSet<CopyId> = BTreeSet::new();
        for &id in ids {
            if !swapped.insert(id) {
                return Err(LedgerError::IllegalArgument(format!("copy {} is listed twice in a swap", id)));
            }
        }

        // Sort handles into assigned and unassigned
        let mut assigned_ids = Vec::new();
        let mut unassigned_ids = Vec::new();
        let mut shards: BTreeSet<ShardId> = BTreeSet::new();
        for &id in &swapped {
            if let Some(copy) = self.lookup(id) {
                if copy.is_relocating() || copy.is_relocation_target() {
                    return Err(LedgerError::IllegalArgument(format!(
                        "cannot swap the role of relocating copy {} of {}",
                        id,
                        copy.shard_id()
                    )));
                }
                shards.insert(copy.shard_id().clone());
                assigned_ids.push(id);
            } else if self.unassigned.contains(id) {
                unassigned_ids.push(id);
            } else {
                return Err(LedgerError::UnknownCopy(id));
            }
        }

        // Validate roles after the swap
        let mut reattach = Vec::new();
        for shard_id in &shards {
            let copies = self.assigned_shards(shard_id);
            let primaries = copies
                .iter()
                .filter(|c| !c.is_relocation_target() && primary_after(c, &swapped))
                .count();
            if primaries > 1 {
                return Err(LedgerError::IllegalArgument(format!(
                    "swap would leave {} with {} primaries",
                    shard_id, primaries
                )));
            }
            let replicas_recovering = copies
                .iter()
                .any(|c| !primary_after(c, &swapped) && c.is_initializing() && c.relocating_node().is_none());
            if replicas_recovering && !copies.iter().any(|c| primary_after(c, &swapped)) {
                return Err(LedgerError::NoPrimaryForRecovery(shard_id.clone()));
            }
            reattach.extend(
                copies
                    .iter()
                    .filter(|c| c.is_initializing() && !c.is_relocation_target())
                    .map(|c| c.id()),
            );
        }

        // Recoveries are re-homed under the new roles
        for &id in &reattach {
            self.update_recovery(id, RecoveryChange::Abort, RecoveryContext::Live)?;
        }
        for &id in &assigned_ids {
            let copy = self.lookup_mut(id).ok_or(LedgerError::UnknownCopy(id))?;
            let before = CopyFacts::of(copy);
            copy.swap_primary();
            debug!("Swapped role of {} ({}), primary now {}", copy.shard_id(), id, copy.is_primary());
            self.counters.apply(Transition::SwapPrimary { before })?;
        }
        for &id in &unassigned_ids {
            self.unassigned.swap_primary(id);
            debug!("Swapped role of unassigned copy {}", id);
        }
        for &id in &reattach {
            self.update_recovery(id, RecoveryChange::Register, RecoveryContext::Live)?;
        }

        self.verify();
        Ok(())
    }

    /// Restart the recovery of an active primary in place
    ///
    /// An in-progress relocation is cancelled first.
    pub fn reinit_shadow_primary(&mut self, id: CopyId) -> LedgerResult<()> {
        self.ensure_mutable()?;
        let copy = self.require_assigned(id)?;
        if !copy.is_primary() {
            return Err(LedgerError::IllegalArgument(format!(
                "copy {} of {} is not a primary",
                id,
                copy.shard_id()
            )));
        }
        if !copy.is_active() {
            return Err(copy.illegal_state("STARTED"));
        }
        if copy.is_relocating() {
            self.cancel_relocation_of(id)?;
        }

        let copy = self.lookup_mut(id).ok_or(LedgerError::UnknownCopy(id))?;
        copy.reinitialize()?;
        let shard_id = copy.shard_id().clone();
        self.counters.apply(Transition::Reinitialize { primary: true })?;
        self.update_recovery(id, RecoveryChange::Register, RecoveryContext::Live)?;

        debug!("Reinitialized primary {} ({})", shard_id, id);
        self.verify();
        Ok(())
    }

    /// Remove an assigned copy from its node
    pub fn remove(&mut self, id: CopyId) -> LedgerResult<ShardCopy> {
        self.ensure_mutable()?;
        let removed = self.remove_assigned(id)?;
        self.verify();
        Ok(removed)
    }

    /// Remove an assigned copy and queue an unassigned clone of it
    ///
    /// Returns the handle of the queued copy, or `None` for a relocation
    /// target, whose source keeps serving the shard.
    pub fn move_to_unassigned(&mut self, id: CopyId, info: UnassignedInfo) -> LedgerResult<Option<CopyId>> {
        self.ensure_mutable()?;
        let removed = self.remove_assigned(id)?;
        let queued = self.requeue(&removed, info);
        self.verify();
        Ok(queued)
    }

    /// Pairing-aware removal
    pub(crate) fn remove_assigned(&mut self, id: CopyId) -> LedgerResult<ShardCopy> {
        let copy = self.require_assigned(id)?;
        let shard_id = copy.shard_id().clone();
        let is_source = copy.is_relocating();
        let counterpart = if is_source || copy.is_relocation_target() {
            self.relocation_counterpart(copy)
        } else {
            None
        };
        let orphans: Vec<CopyId> = if serves_replica_recoveries(copy) {
            self.assigned_shards(&shard_id)
                .iter()
                .filter(|c| c.is_initial_replica_recovery())
                .map(|c| c.id())
                .collect()
        } else {
            Vec::new()
        };

        // Relocation halves go together
        match counterpart {
            Some(target_id) if is_source => {
                self.discard(target_id)?;
            }
            Some(source_id) => {
                let source = self.lookup_mut(source_id).ok_or(LedgerError::UnknownCopy(source_id))?;
                source.cancel_relocation()?;
                self.counters.apply(Transition::CancelRelocation)?;
                debug!("Cancelled relocation of {} ({}) after target removal", shard_id, source_id);
            }
            None => {}
        }

        // Replicas recovering from a removed primary lose their source
        for replica_id in orphans {
            let replica = self.remove_assigned(replica_id)?;
            let info = UnassignedInfo::with_message(
                UnassignedReason::PrimaryFailed,
                format!("primary of {} was removed", shard_id),
            );
            self.requeue(&replica, info);
        }

        let removed = self.discard(id)?;
        debug!("Removed {}", removed);
        Ok(removed)
    }

    /// Remove a single copy: deregister its recovery, apply counters, detach
    pub(crate) fn discard(&mut self, id: CopyId) -> LedgerResult<ShardCopy> {
        let copy = self.lookup(id).ok_or(LedgerError::UnknownCopy(id))?;
        let before = CopyFacts::of(copy);
        if copy.is_initializing() {
            self.update_recovery(id, RecoveryChange::Abort, RecoveryContext::Live)?;
        }
        self.counters.apply(Transition::Remove { before })?;
        self.detach(id)
    }

    pub(crate) fn requeue(&mut self, removed: &ShardCopy, info: UnassignedInfo) -> Option<CopyId> {
        if removed.is_relocation_target() {
            return None;
        }
        let copy = removed.to_unassigned(info);
        let id = copy.id();
        debug!("Moved {} to unassigned as {}", removed.shard_id(), id);
        self.unassigned.push(copy);
        Some(id)
    }
}

/// Role of a copy once the handles in `swapped` have been toggled
fn primary_after(copy: &ShardCopy, swapped: &BTreeSet<CopyId>) -> bool {
    copy.is_primary() != swapped.contains(&copy.id())
}
