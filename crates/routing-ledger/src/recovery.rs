//! Per-node recovery accounting
//!
//! Counts shard copies flowing into and out of every node so admission
//! control can cap concurrent recoveries.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use crate::error::{LedgerError, LedgerResult};
use crate::shard::{NodeId, ShardCopy};

/// In-flight recoveries of one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Recoveries {
    /// Copies initializing onto this node
    pub incoming: u32,
    /// Copies this node is the data source for
    pub outgoing: u32,
}

/// Why a recovery registration changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryChange {
    /// A copy started initializing
    Register,
    /// A copy finished initializing (moved to STARTED)
    Complete,
    /// A copy stopped initializing without finishing (removed)
    Abort,
}

impl RecoveryChange {
    fn delta(&self) -> i64 {
        match self {
            RecoveryChange::Register => 1,
            RecoveryChange::Complete | RecoveryChange::Abort => -1,
        }
    }
}

/// Where the primary of a replica's initial recovery is looked up
#[derive(Debug, Clone, Copy)]
pub enum RecoveryContext<'a> {
    /// Building from a snapshot: the routing table's canonical primary
    Construction { canonical_primary: Option<&'a ShardCopy> },
    /// Normal mutation: an assigned primary must exist
    Live,
}

/// Find the copy acting as primary among the assigned copies of a shard
///
/// An active primary wins; otherwise the first primary that is not a
/// relocation target, otherwise any primary.
pub fn find_primary<'a>(assigned: &[&'a ShardCopy]) -> Option<&'a ShardCopy> {
    let mut candidate: Option<&ShardCopy> = None;
    for copy in assigned.iter().copied().filter(|c| c.is_primary()) {
        if copy.is_active() {
            return Some(copy);
        }
        match candidate {
            None => candidate = Some(copy),
            Some(current) if current.relocating_node().is_some() => candidate = Some(copy),
            Some(_) => {}
        }
    }
    candidate
}

/// Whether a primary is a data source for its shard's initial replica recoveries
///
/// The receiving end of a primary relocation is not.
pub fn serves_replica_recoveries(copy: &ShardCopy) -> bool {
    copy.is_primary() && !copy.is_relocation_target()
}

/// Recovery counters of every node
#[derive(Debug, Clone, Default)]
pub struct RecoveryLedger {
    per_node: HashMap<NodeId, Recoveries>,
}

impl RecoveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: &str) -> Recoveries {
        self.per_node.get(node).copied().unwrap_or_default()
    }

    pub fn incoming(&self, node: &str) -> u32 {
        self.get(node).incoming
    }

    pub fn outgoing(&self, node: &str) -> u32 {
        self.get(node).outgoing
    }

    /// Every node that ever had a recovery registered
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Recoveries)> {
        self.per_node.iter()
    }

    pub(crate) fn adjust_incoming(&mut self, node: &NodeId, delta: i64) -> LedgerResult<()> {
        let entry = self.per_node.entry(node.clone()).or_default();
        entry.incoming = apply_delta(entry.incoming, delta, "incoming", node)?;
        trace!("Recoveries on {}: incoming {} ({:+})", node, entry.incoming, delta);
        Ok(())
    }

    pub(crate) fn adjust_outgoing(&mut self, node: &NodeId, delta: i64) -> LedgerResult<()> {
        let entry = self.per_node.entry(node.clone()).or_default();
        entry.outgoing = apply_delta(entry.outgoing, delta, "outgoing", node)?;
        trace!("Recoveries on {}: outgoing {} ({:+})", node, entry.outgoing, delta);
        Ok(())
    }

    /// Register or deregister the recovery of an initializing copy
    ///
    /// `assigned` holds every assigned copy of the same shard. The source of
    /// the recovery is the relocation source if the copy has one, the
    /// shard's primary for a replica, and nothing for a primary. When a
    /// primary relocation completes, the outgoing credits of replicas that
    /// were recovering from the old primary move to the new one.
    pub(crate) fn update(
        &mut self,
        copy: &ShardCopy,
        change: RecoveryChange,
        assigned: &[&ShardCopy],
        context: RecoveryContext<'_>,
    ) -> LedgerResult<()> {
        if !copy.is_initializing() {
            return Err(copy.illegal_state("INITIALIZING"));
        }
        let node = copy
            .current_node()
            .ok_or_else(|| LedgerError::IllegalArgument(format!("recovery of unassigned copy {}", copy.id())))?;

        let mut transfer = 0i64;
        let source: Option<NodeId> = if let Some(relocating) = copy.relocating_node() {
            if copy.is_primary() && change == RecoveryChange::Complete {
                transfer = assigned
                    .iter()
                    .filter(|c| c.is_initial_replica_recovery())
                    .count() as i64;
            }
            Some(relocating.clone())
        } else if !copy.is_primary() {
            match context {
                RecoveryContext::Construction { canonical_primary } => {
                    canonical_primary.and_then(|p| p.current_node()).cloned()
                }
                // A replica registered without any primary never had a source
                RecoveryContext::Live => match find_primary(assigned) {
                    Some(primary) => primary.current_node().cloned(),
                    None if change == RecoveryChange::Register => {
                        return Err(LedgerError::NoPrimaryForRecovery(copy.shard_id().clone()));
                    }
                    None => None,
                },
            }
        } else {
            None
        };

        let delta = change.delta();
        self.check_outgoing(source.as_ref(), delta, transfer)?;
        self.adjust_incoming(node, delta)?;
        if let Some(source) = &source {
            if transfer > 0 {
                self.adjust_outgoing(source, -transfer)?;
                self.adjust_outgoing(node, transfer)?;
            }
            self.adjust_outgoing(source, delta)?;
        }
        Ok(())
    }

    /// Fail before touching anything if the source cannot absorb the change
    fn check_outgoing(&self, source: Option<&NodeId>, delta: i64, transfer: i64) -> LedgerResult<()> {
        if let Some(source) = source {
            if i64::from(self.outgoing(source)) + delta - transfer < 0 {
                return Err(LedgerError::CounterUnderflow {
                    counter: "outgoing",
                    scope: source.clone(),
                });
            }
        }
        Ok(())
    }
}

fn apply_delta(value: u32, delta: i64, counter: &'static str, node: &NodeId) -> LedgerResult<u32> {
    let next = i64::from(value) + delta;
    if next < 0 {
        return Err(LedgerError::CounterUnderflow {
            counter,
            scope: node.clone(),
        });
    }
    Ok(next as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardId;

    fn shard() -> ShardId {
        ShardId::new("logs", 0)
    }

    #[test]
    fn test_find_primary_prefers_active() {
        let mut source = ShardCopy::new_started(shard(), true, "n1");
        source.relocate("n2".to_string(), None).unwrap();
        let target = source.build_relocation_target().unwrap();
        let replica = ShardCopy::new_started(shard(), false, "n3");

        let assigned = vec![&target, &replica, &source];
        assert_eq!(find_primary(&assigned).map(|c| c.id()), Some(source.id()));
    }

    #[test]
    fn test_find_primary_falls_back_to_inactive() {
        let initializing = ShardCopy::new_initializing(shard(), true, "n1");
        let replica = ShardCopy::new_started(shard(), false, "n2");
        let assigned = vec![&replica, &initializing];
        assert_eq!(find_primary(&assigned).map(|c| c.id()), Some(initializing.id()));
        assert!(find_primary(&[&replica]).is_none());
    }

    #[test]
    fn test_replica_recovery_counts_primary_node() {
        let primary = ShardCopy::new_started(shard(), true, "n1");
        let replica = ShardCopy::new_initializing(shard(), false, "n2");
        let mut ledger = RecoveryLedger::new();

        ledger
            .update(&replica, RecoveryChange::Register, &[&primary, &replica], RecoveryContext::Live)
            .unwrap();
        assert_eq!(ledger.incoming("n2"), 1);
        assert_eq!(ledger.outgoing("n1"), 1);

        ledger
            .update(&replica, RecoveryChange::Complete, &[&primary, &replica], RecoveryContext::Live)
            .unwrap();
        assert_eq!(ledger.get("n1"), Recoveries::default());
        assert_eq!(ledger.get("n2"), Recoveries::default());
    }

    #[test]
    fn test_replica_without_primary_fails_live() {
        let replica = ShardCopy::new_initializing(shard(), false, "n2");
        let mut ledger = RecoveryLedger::new();
        let result = ledger.update(&replica, RecoveryChange::Register, &[&replica], RecoveryContext::Live);
        assert!(matches!(result, Err(LedgerError::NoPrimaryForRecovery(_))));
        assert_eq!(ledger.incoming("n2"), 0);
    }

    #[test]
    fn test_orphan_replica_deregisters_without_source() {
        let replica = ShardCopy::new_initializing(shard(), false, "n2");
        let mut ledger = RecoveryLedger::new();
        ledger
            .update(
                &replica,
                RecoveryChange::Register,
                &[&replica],
                RecoveryContext::Construction { canonical_primary: None },
            )
            .unwrap();
        ledger
            .update(&replica, RecoveryChange::Abort, &[&replica], RecoveryContext::Live)
            .unwrap();
        assert_eq!(ledger.get("n2"), Recoveries::default());
    }

    #[test]
    fn test_construction_uses_canonical_primary() {
        let canonical = ShardCopy::new_unassigned(
            shard(),
            true,
            crate::shard::UnassignedInfo::new(crate::shard::UnassignedReason::IndexCreated),
        );
        let replica = ShardCopy::new_initializing(shard(), false, "n2");
        let mut ledger = RecoveryLedger::new();
        ledger
            .update(
                &replica,
                RecoveryChange::Register,
                &[&replica],
                RecoveryContext::Construction {
                    canonical_primary: Some(&canonical),
                },
            )
            .unwrap();
        assert_eq!(ledger.incoming("n2"), 1);
        assert!(ledger.iter().all(|(_, r)| r.outgoing == 0));
    }

    #[test]
    fn test_primary_relocation_transfers_replica_credits() {
        let mut source = ShardCopy::new_started(shard(), true, "n1");
        source.relocate("n2".to_string(), None).unwrap();
        let target = source.build_relocation_target().unwrap();
        let replica = ShardCopy::new_initializing(shard(), false, "n3");
        let assigned = vec![&source, &target, &replica];

        let mut ledger = RecoveryLedger::new();
        ledger
            .update(&replica, RecoveryChange::Register, &assigned, RecoveryContext::Live)
            .unwrap();
        ledger
            .update(&target, RecoveryChange::Register, &assigned, RecoveryContext::Live)
            .unwrap();
        assert_eq!(ledger.outgoing("n1"), 2);
        assert_eq!(ledger.incoming("n2"), 1);

        ledger
            .update(&target, RecoveryChange::Complete, &assigned, RecoveryContext::Live)
            .unwrap();
        assert_eq!(ledger.outgoing("n1"), 0);
        assert_eq!(ledger.outgoing("n2"), 1);
        assert_eq!(ledger.incoming("n2"), 0);
    }

    #[test]
    fn test_aborted_primary_relocation_keeps_credits() {
        let mut source = ShardCopy::new_started(shard(), true, "n1");
        source.relocate("n2".to_string(), None).unwrap();
        let target = source.build_relocation_target().unwrap();
        let replica = ShardCopy::new_initializing(shard(), false, "n3");
        let assigned = vec![&source, &target, &replica];

        let mut ledger = RecoveryLedger::new();
        ledger
            .update(&replica, RecoveryChange::Register, &assigned, RecoveryContext::Live)
            .unwrap();
        ledger
            .update(&target, RecoveryChange::Register, &assigned, RecoveryContext::Live)
            .unwrap();
        ledger
            .update(&target, RecoveryChange::Abort, &assigned, RecoveryContext::Live)
            .unwrap();
        assert_eq!(ledger.outgoing("n1"), 1);
        assert_eq!(ledger.outgoing("n2"), 0);
    }
}
