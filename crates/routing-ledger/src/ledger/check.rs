//! Consistency checker
//!
//! Recomputes every derived value of the ledger from the per-node lists
//! and compares it with the incrementally maintained one. Meant for tests
//! and debug runs; it walks the whole ledger.

use std::collections::{BTreeSet, HashMap};

use super::RoutingLedger;
use crate::error::ConsistencyError;
use crate::recovery::{find_primary, Recoveries};
use crate::shard::{CopyId, NodeId, ShardId};
use crate::transition::RoutingCounters;

impl RoutingLedger {
    /// Verify all counters, indexes and recovery counts
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        let mut counters = RoutingCounters::default();
        let mut by_shard: HashMap<&ShardId, Vec<CopyId>> = HashMap::new();
        let mut listed = 0;

        for (node_id, node) in &self.nodes {
            for copy in node.iter() {
                listed += 1;
                let located = self.locations.get(&copy.id());
                if located != Some(node_id) || copy.current_node() != Some(node_id) {
                    return Err(ConsistencyError::Location {
                        copy: copy.id(),
                        located: located.cloned(),
                        listed: Some(node_id.clone()),
                    });
                }
                if copy.is_relocating() {
                    counters.relocating_shards += 1;
                }
                if !copy.is_active() && !copy.is_relocation_target() {
                    counters.inactive_shards += 1;
                    if copy.is_primary() {
                        counters.inactive_primaries += 1;
                    }
                }
                by_shard.entry(copy.shard_id()).or_default().push(copy.id());
            }
        }

        // Locations pointing at copies no node lists
        if listed != self.locations.len() {
            for (id, node_id) in &self.locations {
                let present = self.nodes.get(node_id).map(|n| n.get(*id).is_some()).unwrap_or(false);
                if !present {
                    return Err(ConsistencyError::Location {
                        copy: *id,
                        located: Some(node_id.clone()),
                        listed: None,
                    });
                }
            }
        }

        check_counter("inactive_shards", self.counters.inactive_shards, counters.inactive_shards)?;
        check_counter("inactive_primaries", self.counters.inactive_primaries, counters.inactive_primaries)?;
        check_counter("relocating_shards", self.counters.relocating_shards, counters.relocating_shards)?;

        // Shard index against the node lists
        let shard_ids: BTreeSet<&ShardId> = by_shard.keys().copied().chain(self.assigned.keys()).collect();
        for shard_id in shard_ids {
            let mut indexed = self.assigned.get(shard_id).cloned().unwrap_or_default();
            let mut on_nodes = by_shard.get(shard_id).cloned().unwrap_or_default();
            indexed.sort();
            on_nodes.sort();
            if indexed != on_nodes || indexed.is_empty() {
                return Err(ConsistencyError::ShardIndex {
                    shard_id: shard_id.clone(),
                    indexed,
                    on_nodes,
                });
            }
        }

        // Recoveries, using the same source rule as registration
        let mut expected: HashMap<&NodeId, Recoveries> = HashMap::new();
        for shard_id in self.assigned.keys() {
            let copies = self.assigned_shards(shard_id);
            let primary_node = find_primary(&copies).and_then(|p| p.current_node());
            for copy in copies.iter().filter(|c| c.is_initializing()) {
                if let Some(node_id) = copy.current_node() {
                    expected.entry(node_id).or_default().incoming += 1;
                }
                if let Some(source) = copy.relocating_node() {
                    expected.entry(source).or_default().outgoing += 1;
                } else if !copy.is_primary() {
                    if let Some(source) = primary_node {
                        expected.entry(source).or_default().outgoing += 1;
                    }
                }
            }
        }
        let nodes: BTreeSet<&NodeId> = expected.keys().copied().chain(self.recoveries.iter().map(|(n, _)| n)).collect();
        for node_id in nodes {
            let maintained = self.recoveries.get(node_id);
            let recomputed = expected.get(node_id).copied().unwrap_or_default();
            if maintained.incoming != recomputed.incoming {
                return Err(ConsistencyError::Recoveries {
                    node: node_id.clone(),
                    direction: "incoming",
                    maintained: maintained.incoming,
                    recomputed: recomputed.incoming,
                });
            }
            if maintained.outgoing != recomputed.outgoing {
                return Err(ConsistencyError::Recoveries {
                    node: node_id.clone(),
                    direction: "outgoing",
                    maintained: maintained.outgoing,
                    recomputed: recomputed.outgoing,
                });
            }
        }

        // Unassigned queue
        for copy in self.unassigned.iter().chain(self.unassigned.ignored().iter()) {
            if !copy.is_unassigned() {
                return Err(ConsistencyError::NotUnassigned(copy.id()));
            }
        }
        check_counter(
            "unassigned_primaries",
            self.unassigned.num_primaries(),
            self.unassigned.iter().filter(|c| c.is_primary()).count(),
        )?;
        check_counter(
            "ignored_primaries",
            self.unassigned.num_ignored_primaries(),
            self.unassigned.ignored().iter().filter(|c| c.is_primary()).count(),
        )?;

        Ok(())
    }

    /// Panic if the ledger is inconsistent
    pub fn assert_consistent(&self) {
        if let Err(e) = self.check_consistency() {
            panic!("Routing ledger is inconsistent: {}\n{}", e, self.pretty_print());
        }
    }
}

fn check_counter(counter: &'static str, maintained: usize, recomputed: usize) -> Result<(), ConsistencyError> {
    if maintained == recomputed {
        Ok(())
    } else {
        Err(ConsistencyError::Counter {
            counter,
            maintained,
            recomputed,
        })
    }
}
