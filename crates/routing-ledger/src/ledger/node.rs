//! Per-node shard list

use std::fmt;

use crate::shard::{CopyId, NodeId, ShardCopy, ShardId, ShardState};
use crate::snapshot::ClusterNode;

/// The shard copies assigned to one node
///
/// Holds relocation sources and the INITIALIZING targets of relocations
/// towards this node alike. `node` is `None` when a snapshot copy points at
/// a node that is not part of the live node set.
#[derive(Debug, Clone)]
pub struct RoutingNode {
    node_id: NodeId,
    node: Option<ClusterNode>,
    shards: Vec<ShardCopy>,
}

impl RoutingNode {
    pub(crate) fn new(node_id: NodeId, node: Option<ClusterNode>) -> Self {
        Self {
            node_id,
            node,
            shards: Vec::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn node(&self) -> Option<&ClusterNode> {
        self.node.as_ref()
    }

    pub fn shards(&self) -> &[ShardCopy] {
        &self.shards
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardCopy> {
        self.shards.iter()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// The copy of `shard_id` on this node, if any
    pub fn get_by_shard_id(&self, shard_id: &ShardId) -> Option<&ShardCopy> {
        self.shards.iter().find(|c| c.shard_id() == shard_id)
    }

    pub fn shards_with_state(&self, states: &[ShardState]) -> Vec<&ShardCopy> {
        self.shards.iter().filter(|c| states.contains(&c.state())).collect()
    }

    pub fn number_of_shards_with_state(&self, states: &[ShardState]) -> usize {
        self.shards.iter().filter(|c| states.contains(&c.state())).count()
    }

    /// Copies that will stay on this node (relocation sources excluded)
    pub fn number_of_owning_shards(&self) -> usize {
        self.shards.iter().filter(|c| !c.is_relocating()).count()
    }

    pub(crate) fn get(&self, id: CopyId) -> Option<&ShardCopy> {
        self.shards.iter().find(|c| c.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: CopyId) -> Option<&mut ShardCopy> {
        self.shards.iter_mut().find(|c| c.id() == id)
    }

    pub(crate) fn add(&mut self, copy: ShardCopy) {
        self.shards.push(copy);
    }

    pub(crate) fn remove(&mut self, id: CopyId) -> Option<ShardCopy> {
        let pos = self.shards.iter().position(|c| c.id() == id)?;
        Some(self.shards.remove(pos))
    }

    pub(crate) fn copy_ids(&self) -> Vec<CopyId> {
        self.shards.iter().map(|c| c.id()).collect()
    }
}

impl fmt::Display for RoutingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "-----node_id[{}][{}]",
            self.node_id,
            if self.node.is_some() { "V" } else { "X" }
        )?;
        for copy in &self.shards {
            writeln!(f, "--------{}", copy)?;
        }
        Ok(())
    }
}
