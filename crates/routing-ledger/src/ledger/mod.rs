//! Routing ledger
//!
//! Per-node shard lists built from a [`ClusterSnapshot`], a shard-id index
//! over every assigned copy, the unassigned queue and the recovery ledger.
//! Counters are maintained incrementally by the mutation operations and can
//! be recomputed from scratch by [`RoutingLedger::check_consistency`].

mod check;
mod cursor;
mod mutation;
mod node;

pub use cursor::{NodeCursor, UnassignedCursor};
pub use node::RoutingNode;

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::recovery::{find_primary, Recoveries, RecoveryChange, RecoveryContext, RecoveryLedger};
use crate::shard::{CopyId, NodeId, ShardCopy, ShardId, ShardState, UnassignedInfo, UnassignedReason};
use crate::snapshot::{ClusterBlocks, ClusterSnapshot, Metadata, RoutingTable};
use crate::transition::{RoutingCounters, Transition};
use crate::unassigned::UnassignedQueue;

/// Whether a ledger accepts mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    /// Inspection only; every mutation fails with [`LedgerError::ReadOnly`]
    ReadOnly,
    /// Owned by one scheduling pass
    Mutable,
}

/// Summary counts of a ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub nodes: usize,
    pub assigned_copies: usize,
    pub unassigned: usize,
    pub ignored: usize,
    pub unassigned_primaries: usize,
    pub ignored_primaries: usize,
    pub counters: RoutingCounters,
    pub recoveries: BTreeMap<NodeId, Recoveries>,
}

/// Mutable view of where every shard copy lives
pub struct RoutingLedger {
    mode: LedgerMode,
    verify_consistency: bool,
    snapshot: Arc<ClusterSnapshot>,
    nodes: BTreeMap<NodeId, RoutingNode>,
    /// Assigned copies per shard, in insertion order
    assigned: HashMap<ShardId, Vec<CopyId>>,
    /// Node of every assigned copy
    locations: HashMap<CopyId, NodeId>,
    unassigned: UnassignedQueue,
    recoveries: RecoveryLedger,
    counters: RoutingCounters,
    /// attribute name -> attribute value -> node count
    attribute_counts: RwLock<HashMap<String, HashMap<String, usize>>>,
}

impl RoutingLedger {
    /// Build a ledger from a snapshot
    ///
    /// Copies are cloned out of the snapshot and given fresh handles, so
    /// the ledger never shares state with its input.
    pub fn new(snapshot: Arc<ClusterSnapshot>, mode: LedgerMode) -> LedgerResult<Self> {
        let mut ledger = Self {
            mode,
            verify_consistency: false,
            snapshot: Arc::clone(&snapshot),
            nodes: BTreeMap::new(),
            assigned: HashMap::new(),
            locations: HashMap::new(),
            unassigned: UnassignedQueue::new(),
            recoveries: RecoveryLedger::new(),
            counters: RoutingCounters::default(),
            attribute_counts: RwLock::new(HashMap::new()),
        };

        // One list per data node, even if it holds nothing
        for node in snapshot.data_nodes() {
            ledger
                .nodes
                .insert(node.id.clone(), RoutingNode::new(node.id.clone(), Some(node.clone())));
        }

        // Place copies first; recoveries need the complete shard index
        let mut initializing: Vec<(CopyId, Option<&ShardCopy>)> = Vec::new();
        for table in snapshot.routing_table.shard_tables() {
            let canonical_primary = table.primary();
            for copy in &table.copies {
                let copy = copy.clone().restamped();
                if copy.is_unassigned() {
                    ledger.unassigned.push(copy);
                    continue;
                }
                let Some(node_id) = copy.current_node().cloned() else {
                    warn!("Shard copy {} is {} without a node, treating as unassigned", copy.shard_id(), copy.state());
                    let info = UnassignedInfo::with_message(UnassignedReason::ClusterRecovered, "assigned copy without a node");
                    ledger.unassigned.push(copy.to_unassigned(info));
                    continue;
                };
                if copy.is_relocation_target() {
                    warn!("Skipping relocation target {} on {} in snapshot", copy.shard_id(), node_id);
                    continue;
                }
                ledger.ensure_node(&node_id, &copy);

                match copy.state() {
                    ShardState::Initializing => {
                        ledger.counters.apply(Transition::Initialize {
                            primary: copy.is_primary(),
                        })?;
                        initializing.push((copy.id(), canonical_primary));
                        ledger.place(copy)?;
                    }
                    ShardState::Relocating => {
                        let target = copy.build_relocation_target()?;
                        if let Some(target_node) = target.current_node().cloned() {
                            ledger.ensure_node(&target_node, &target);
                        }
                        ledger.counters.apply(Transition::Relocate)?;
                        initializing.push((target.id(), canonical_primary));
                        ledger.place(copy)?;
                        ledger.place(target)?;
                    }
                    _ => {
                        ledger.place(copy)?;
                    }
                }
            }
        }

        for (id, canonical_primary) in initializing {
            ledger.update_recovery(id, RecoveryChange::Register, RecoveryContext::Construction { canonical_primary })?;
        }

        info!(
            "Built routing ledger for '{}' ({:?}): {} nodes, {} assigned copies, {} unassigned, {} inactive, {} relocating",
            snapshot.cluster_name,
            mode,
            ledger.nodes.len(),
            ledger.locations.len(),
            ledger.unassigned.len(),
            ledger.counters.inactive_shards,
            ledger.counters.relocating_shards
        );
        Ok(ledger)
    }

    /// Build a ledger with the mode and checking taken from configuration
    pub fn with_config(snapshot: Arc<ClusterSnapshot>, config: &LedgerConfig) -> LedgerResult<Self> {
        let mode = if config.read_only {
            LedgerMode::ReadOnly
        } else {
            LedgerMode::Mutable
        };
        let mut ledger = Self::new(snapshot, mode)?;
        ledger.verify_consistency = config.verify_consistency;
        ledger.verify();
        Ok(ledger)
    }

    /// Build a shared read-only view
    pub fn view(snapshot: Arc<ClusterSnapshot>) -> LedgerResult<LedgerView> {
        Ok(Self::new(snapshot, LedgerMode::ReadOnly)?.into_view())
    }

    /// Freeze this ledger into a shared read-only view
    pub fn into_view(mut self) -> LedgerView {
        self.mode = LedgerMode::ReadOnly;
        LedgerView(Arc::new(self))
    }

    /// Run the consistency checker after every mutation (panics on mismatch)
    pub fn set_verify_consistency(&mut self, verify: bool) {
        self.verify_consistency = verify;
    }

    pub fn mode(&self) -> LedgerMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == LedgerMode::ReadOnly
    }

    pub(crate) fn ensure_mutable(&self) -> LedgerResult<()> {
        match self.mode {
            LedgerMode::Mutable => Ok(()),
            LedgerMode::ReadOnly => Err(LedgerError::ReadOnly),
        }
    }

    pub(crate) fn verify(&self) {
        if self.verify_consistency {
            self.assert_consistent();
        }
    }

    fn ensure_node(&mut self, node_id: &NodeId, copy: &ShardCopy) {
        if self.nodes.contains_key(node_id) {
            return;
        }
        let node = self.snapshot.nodes.get(node_id).cloned();
        match &node {
            Some(_) => debug!("Shard copy {} is assigned to non-data node {}", copy.shard_id(), node_id),
            None => warn!("Shard copy {} is assigned to unknown node {}", copy.shard_id(), node_id),
        }
        self.nodes.insert(node_id.clone(), RoutingNode::new(node_id.clone(), node));
    }

    // ---- internal bookkeeping ----

    pub(crate) fn lookup(&self, id: CopyId) -> Option<&ShardCopy> {
        find_copy(&self.nodes, &self.locations, id)
    }

    pub(crate) fn lookup_mut(&mut self, id: CopyId) -> Option<&mut ShardCopy> {
        let node_id = self.locations.get(&id)?;
        self.nodes.get_mut(node_id)?.get_mut(id)
    }

    /// The assigned copy behind `id`, or the error describing why there is none
    pub(crate) fn require_assigned(&self, id: CopyId) -> LedgerResult<&ShardCopy> {
        if let Some(copy) = self.lookup(id) {
            return Ok(copy);
        }
        match self.unassigned.find(id) {
            Some(copy) => Err(copy.illegal_state("assigned")),
            None => Err(LedgerError::UnknownCopy(id)),
        }
    }

    /// Add an assigned copy to its node, the shard index and the locations
    pub(crate) fn place(&mut self, copy: ShardCopy) -> LedgerResult<CopyId> {
        let node_id = copy
            .current_node()
            .cloned()
            .ok_or_else(|| LedgerError::IllegalArgument(format!("cannot place unassigned copy {}", copy.id())))?;
        let id = copy.id();
        self.assigned.entry(copy.shard_id().clone()).or_default().push(id);
        self.locations.insert(id, node_id.clone());
        self.nodes
            .entry(node_id.clone())
            .or_insert_with(|| RoutingNode::new(node_id, None))
            .add(copy);
        Ok(id)
    }

    /// Take a copy out of its node, the shard index and the locations
    pub(crate) fn detach(&mut self, id: CopyId) -> LedgerResult<ShardCopy> {
        let node_id = self.locations.remove(&id).ok_or(LedgerError::UnknownCopy(id))?;
        let copy = self
            .nodes
            .get_mut(&node_id)
            .and_then(|node| node.remove(id))
            .ok_or(LedgerError::UnknownCopy(id))?;
        if let Entry::Occupied(mut entry) = self.assigned.entry(copy.shard_id().clone()) {
            entry.get_mut().retain(|c| *c != id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        Ok(copy)
    }

    pub(crate) fn update_recovery(
        &mut self,
        id: CopyId,
        change: RecoveryChange,
        context: RecoveryContext<'_>,
    ) -> LedgerResult<()> {
        let copy = find_copy(&self.nodes, &self.locations, id).ok_or(LedgerError::UnknownCopy(id))?;
        let assigned = assigned_of(&self.nodes, &self.locations, &self.assigned, copy.shard_id());
        self.recoveries.update(copy, change, &assigned, context)
    }

    /// The other half of a relocation pair
    pub(crate) fn relocation_counterpart(&self, copy: &ShardCopy) -> Option<CopyId> {
        self.assigned_shards(copy.shard_id())
            .into_iter()
            .find(|c| c.id() != copy.id() && c.is_relocating() != copy.is_relocating() && copy.is_relocation_pair_of(c))
            .map(|c| c.id())
    }

    // ---- queries ----

    /// Any copy held by the ledger, assigned or unassigned
    pub fn copy(&self, id: CopyId) -> Option<&ShardCopy> {
        self.lookup(id).or_else(|| self.unassigned.find(id))
    }

    pub fn node(&self, node_id: &str) -> Option<&RoutingNode> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RoutingNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Every assigned copy of a shard, relocation targets included
    pub fn assigned_shards(&self, shard_id: &ShardId) -> Vec<&ShardCopy> {
        assigned_of(&self.nodes, &self.locations, &self.assigned, shard_id)
    }

    pub fn active_primary(&self, shard_id: &ShardId) -> Option<&ShardCopy> {
        self.assigned_shards(shard_id)
            .into_iter()
            .find(|c| c.is_primary() && c.is_active())
    }

    pub fn active_replica(&self, shard_id: &ShardId) -> Option<&ShardCopy> {
        self.assigned_shards(shard_id)
            .into_iter()
            .find(|c| !c.is_primary() && c.is_active())
    }

    /// Assigned replica copies of a shard
    pub fn replicas(&self, shard_id: &ShardId) -> Vec<&ShardCopy> {
        self.assigned_shards(shard_id)
            .into_iter()
            .filter(|c| !c.is_primary())
            .collect()
    }

    /// The copy acting as primary for recoveries of a shard
    pub fn primary_for_recovery(&self, shard_id: &ShardId) -> Option<&ShardCopy> {
        find_primary(&self.assigned_shards(shard_id))
    }

    /// Whether every expected copy of the shard is assigned and active
    pub fn all_replicas_active(&self, shard_id: &ShardId) -> bool {
        let copies = self.assigned_shards(shard_id);
        // fewer assigned copies than expected means at least one is unassigned
        if copies.is_empty() || copies.len() < self.snapshot.routing_table.expected_copies(shard_id) {
            return false;
        }
        copies.iter().all(|c| c.is_active())
    }

    /// Assigned copies matching a predicate
    pub fn shards<F>(&self, mut predicate: F) -> Vec<&ShardCopy>
    where
        F: FnMut(&ShardCopy) -> bool,
    {
        self.nodes
            .values()
            .flat_map(|n| n.iter())
            .filter(|c| predicate(c))
            .collect()
    }

    /// Copies in any of `states`; pending unassigned copies are included
    /// when UNASSIGNED is requested
    pub fn shards_with_state(&self, states: &[ShardState]) -> Vec<&ShardCopy> {
        let mut result = self.shards(|c| states.contains(&c.state()));
        if states.contains(&ShardState::Unassigned) {
            result.extend(self.unassigned.iter());
        }
        result
    }

    pub fn shards_with_state_on_index(&self, index: &str, states: &[ShardState]) -> Vec<&ShardCopy> {
        self.shards_with_state(states)
            .into_iter()
            .filter(|c| c.index() == index)
            .collect()
    }

    /// Data node count per value of a node attribute
    ///
    /// Cached per attribute for the lifetime of the ledger.
    pub fn node_counts_by_attribute(&self, attribute: &str) -> HashMap<String, usize> {
        if let Some(counts) = self.attribute_counts.read().get(attribute) {
            return counts.clone();
        }
        let mut counts: HashMap<String, usize> = HashMap::new();
        for node in self.nodes.values().filter_map(|n| n.node()).filter(|n| n.data) {
            if let Some(value) = node.attributes.get(attribute) {
                *counts.entry(value.clone()).or_insert(0) += 1;
            }
        }
        self.attribute_counts
            .write()
            .entry(attribute.to_string())
            .or_insert(counts)
            .clone()
    }

    pub fn unassigned(&self) -> &UnassignedQueue {
        &self.unassigned
    }

    /// The unassigned queue for sorting, shuffling or draining
    pub fn unassigned_mut(&mut self) -> LedgerResult<&mut UnassignedQueue> {
        self.ensure_mutable()?;
        Ok(&mut self.unassigned)
    }

    pub fn has_unassigned_shards(&self) -> bool {
        !self.unassigned.is_empty()
    }

    pub fn has_unassigned_primaries(&self) -> bool {
        self.unassigned.has_primaries()
    }

    pub fn has_inactive_shards(&self) -> bool {
        self.counters.inactive_shards > 0
    }

    pub fn has_inactive_primaries(&self) -> bool {
        self.counters.inactive_primaries > 0
    }

    pub fn counters(&self) -> RoutingCounters {
        self.counters
    }

    pub fn inactive_shard_count(&self) -> usize {
        self.counters.inactive_shards
    }

    pub fn inactive_primary_count(&self) -> usize {
        self.counters.inactive_primaries
    }

    pub fn relocating_shard_count(&self) -> usize {
        self.counters.relocating_shards
    }

    pub fn incoming_recoveries(&self, node_id: &str) -> u32 {
        self.recoveries.incoming(node_id)
    }

    pub fn outgoing_recoveries(&self, node_id: &str) -> u32 {
        self.recoveries.outgoing(node_id)
    }

    pub fn recoveries(&self) -> &RecoveryLedger {
        &self.recoveries
    }

    pub fn snapshot(&self) -> &ClusterSnapshot {
        &self.snapshot
    }

    pub fn metadata(&self) -> &Metadata {
        &self.snapshot.metadata
    }

    pub fn blocks(&self) -> &ClusterBlocks {
        &self.snapshot.blocks
    }

    pub fn customs(&self) -> &BTreeMap<String, Value> {
        &self.snapshot.customs
    }

    /// The routing table this ledger was built from
    pub fn routing_table(&self) -> &RoutingTable {
        &self.snapshot.routing_table
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            nodes: self.nodes.len(),
            assigned_copies: self.locations.len(),
            unassigned: self.unassigned.len(),
            ignored: self.unassigned.ignored_len(),
            unassigned_primaries: self.unassigned.num_primaries(),
            ignored_primaries: self.unassigned.num_ignored_primaries(),
            counters: self.counters,
            recoveries: self
                .recoveries
                .iter()
                .filter(|(_, r)| r.incoming > 0 || r.outgoing > 0)
                .map(|(node, r)| (node.clone(), *r))
                .collect(),
        }
    }

    /// Convert the current state back into a routing table
    ///
    /// Relocation targets are left out (rebuilt from their sources) and
    /// ignored copies are reinstated as unassigned.
    pub fn build_routing_table(&self) -> RoutingTable {
        let mut table = RoutingTable::new();
        table.version = self.snapshot.routing_table.version;
        table.bump_version();
        for copy in self.nodes.values().flat_map(|n| n.iter()) {
            if !copy.is_relocation_target() {
                table.add_copy(copy.clone());
            }
        }
        for copy in self.unassigned.iter().chain(self.unassigned.ignored().iter()) {
            table.add_copy(copy.clone());
        }
        table
    }

    /// The input snapshot with the routing table replaced by the current state
    pub fn build_snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            version: self.snapshot.version + 1,
            routing_table: self.build_routing_table(),
            ..(*self.snapshot).clone()
        }
    }

    /// Human readable dump of every node and the unassigned list
    pub fn pretty_print(&self) -> String {
        let mut out = String::from("routing_nodes:\n");
        for node in self.nodes.values() {
            out.push_str(&node.to_string());
        }
        out.push_str("---- unassigned\n");
        for copy in self.unassigned.iter() {
            out.push_str(&format!("--------{}\n", copy));
        }
        out
    }
}

impl fmt::Display for RoutingLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty_print())
    }
}

impl fmt::Debug for RoutingLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingLedger")
            .field("mode", &self.mode)
            .field("nodes", &self.nodes.len())
            .field("assigned", &self.locations.len())
            .field("unassigned", &self.unassigned.len())
            .field("counters", &self.counters)
            .finish()
    }
}

/// Shared read-only ledger
///
/// Cloning is cheap; only queries are reachable.
#[derive(Clone)]
pub struct LedgerView(Arc<RoutingLedger>);

impl Deref for LedgerView {
    type Target = RoutingLedger;

    fn deref(&self) -> &RoutingLedger {
        &self.0
    }
}

impl fmt::Debug for LedgerView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LedgerView").field(&*self.0).finish()
    }
}

fn find_copy<'a>(
    nodes: &'a BTreeMap<NodeId, RoutingNode>,
    locations: &HashMap<CopyId, NodeId>,
    id: CopyId,
) -> Option<&'a ShardCopy> {
    nodes.get(locations.get(&id)?)?.get(id)
}

fn assigned_of<'a>(
    nodes: &'a BTreeMap<NodeId, RoutingNode>,
    locations: &HashMap<CopyId, NodeId>,
    index: &HashMap<ShardId, Vec<CopyId>>,
    shard_id: &ShardId,
) -> Vec<&'a ShardCopy> {
    index
        .get(shard_id)
        .map(|ids| ids.iter().filter_map(|id| find_copy(nodes, locations, *id)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ClusterNode;

    fn shard() -> ShardId {
        ShardId::new("logs", 0)
    }

    #[test]
    fn test_construction_places_copies() {
        let snapshot = ClusterSnapshot::builder("test")
            .data_nodes(["n1", "n2", "n3"])
            .index("logs", 1, 2)
            .copies(
                &shard(),
                vec![
                    ShardCopy::new_relocating(shard(), true, "n1", "n3"),
                    ShardCopy::new_initializing(shard(), false, "n2"),
                    ShardCopy::new_unassigned(shard(), false, UnassignedInfo::new(UnassignedReason::NodeLeft)),
                ],
            )
            .build();
        let ledger = RoutingLedger::new(snapshot.into_shared(), LedgerMode::Mutable).unwrap();

        assert_eq!(ledger.assigned_shards(&shard()).len(), 3);
        assert_eq!(ledger.relocating_shard_count(), 1);
        assert_eq!(ledger.inactive_shard_count(), 1);
        assert_eq!(ledger.inactive_primary_count(), 0);
        assert_eq!(ledger.unassigned().len(), 1);
        // n1 feeds both the relocation and the replica recovery
        assert_eq!(ledger.outgoing_recoveries("n1"), 2);
        assert_eq!(ledger.incoming_recoveries("n2"), 1);
        assert_eq!(ledger.incoming_recoveries("n3"), 1);
        ledger.assert_consistent();
    }

    #[test]
    fn test_skipped_relocation_target_is_not_canonical_primary() {
        let stray_target = ShardCopy::new_relocating(shard(), true, "n1", "n2")
            .build_relocation_target()
            .unwrap();
        let snapshot = ClusterSnapshot::builder("test")
            .data_nodes(["n1", "n2", "n3", "n4"])
            .copies(
                &shard(),
                vec![
                    stray_target,
                    ShardCopy::new_started(shard(), false, "n3"),
                    ShardCopy::new_initializing(shard(), false, "n4"),
                ],
            )
            .build();
        let ledger = RoutingLedger::new(snapshot.into_shared(), LedgerMode::Mutable).unwrap();

        assert!(ledger.node("n2").unwrap().is_empty());
        assert_eq!(ledger.assigned_shards(&shard()).len(), 2);
        assert_eq!(ledger.outgoing_recoveries("n2"), 0);
        assert_eq!(ledger.incoming_recoveries("n4"), 1);
        ledger.assert_consistent();
    }

    #[test]
    fn test_unknown_node_gets_a_list() {
        let snapshot = ClusterSnapshot::builder("test")
            .data_nodes(["n1"])
            .copies(&shard(), vec![ShardCopy::new_started(shard(), true, "gone")])
            .build();
        let ledger = RoutingLedger::new(snapshot.into_shared(), LedgerMode::ReadOnly).unwrap();
        let node = ledger.node("gone").unwrap();
        assert!(node.node().is_none());
        assert_eq!(node.len(), 1);
        assert!(ledger.pretty_print().contains("-----node_id[gone][X]"));
    }

    #[test]
    fn test_non_data_node_keeps_its_details() {
        let snapshot = ClusterSnapshot::builder("test")
            .data_nodes(["n1"])
            .node(ClusterNode::new("m1").without_data().with_attribute("zone", "a"))
            .copies(&shard(), vec![ShardCopy::new_started(shard(), true, "m1")])
            .build();
        let ledger = RoutingLedger::new(snapshot.into_shared(), LedgerMode::ReadOnly).unwrap();
        let node = ledger.node("m1").unwrap();
        assert_eq!(node.node().map(|n| n.id.as_str()), Some("m1"));
        assert_eq!(node.len(), 1);
        assert!(ledger.pretty_print().contains("-----node_id[m1][V]"));
        assert!(ledger.node_counts_by_attribute("zone").is_empty());
        ledger.assert_consistent();
    }

    #[test]
    fn test_copies_do_not_alias_snapshot() {
        let snapshot = ClusterSnapshot::builder("test")
            .data_nodes(["n1"])
            .copies(&shard(), vec![ShardCopy::new_started(shard(), true, "n1")])
            .build()
            .into_shared();
        let ledger = RoutingLedger::new(Arc::clone(&snapshot), LedgerMode::Mutable).unwrap();
        let original = snapshot.routing_table.shard(&shard()).unwrap().primary().unwrap();
        let held = ledger.active_primary(&shard()).unwrap();
        assert_ne!(original.id(), held.id());
        assert_eq!(original.allocation_id(), held.allocation_id());
    }

    #[test]
    fn test_attribute_counts_are_cached() {
        let snapshot = ClusterSnapshot::builder("test")
            .node(ClusterNode::new("n1").with_attribute("zone", "a"))
            .node(ClusterNode::new("n2").with_attribute("zone", "a"))
            .node(ClusterNode::new("n3").with_attribute("zone", "b"))
            .node(ClusterNode::new("m1").without_data().with_attribute("zone", "c"))
            .build();
        let ledger = RoutingLedger::view(snapshot.into_shared()).unwrap();
        let counts = ledger.node_counts_by_attribute("zone");
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));
        assert_eq!(counts.get("c"), None);
        assert!(ledger.attribute_counts.read().contains_key("zone"));
        assert_eq!(ledger.node_counts_by_attribute("zone"), counts);
        assert!(ledger.node_counts_by_attribute("rack").is_empty());
    }

    #[test]
    fn test_all_replicas_active() {
        let snapshot = ClusterSnapshot::builder("test")
            .data_nodes(["n1", "n2"])
            .index("logs", 1, 1)
            .copies(
                &shard(),
                vec![
                    ShardCopy::new_started(shard(), true, "n1"),
                    ShardCopy::new_initializing(shard(), false, "n2"),
                ],
            )
            .build();
        let ledger = RoutingLedger::new(snapshot.into_shared(), LedgerMode::Mutable).unwrap();
        assert!(!ledger.all_replicas_active(&shard()));
        assert!(ledger.active_replica(&shard()).is_none());
        assert_eq!(ledger.replicas(&shard()).len(), 1);
        assert!(!ledger.all_replicas_active(&ShardId::new("missing", 0)));
    }

    #[test]
    fn test_view_is_shareable() {
        fn assert_send_sync<T: Send + Sync + Clone>(_: &T) {}
        let snapshot = ClusterSnapshot::builder("test").data_nodes(["n1"]).index("logs", 1, 0).build();
        let view = RoutingLedger::view(snapshot.into_shared()).unwrap();
        assert_send_sync(&view);
        let other = view.clone();
        assert!(other.is_read_only());
        assert!(other.has_unassigned_primaries());
    }

    #[test]
    fn test_stats_serialize() {
        let snapshot = ClusterSnapshot::builder("test").data_nodes(["n1"]).index("logs", 2, 1).build();
        let ledger = RoutingLedger::new(snapshot.into_shared(), LedgerMode::Mutable).unwrap();
        let stats = ledger.stats();
        assert_eq!(stats.unassigned, 4);
        assert_eq!(stats.unassigned_primaries, 2);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["counters"]["inactive_shards"], 0);
    }
}
