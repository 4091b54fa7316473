//! Cluster snapshot definitions
//!
//! The read-only input a ledger is built from: live nodes, the routing
//! table of index -> shard -> copies, index metadata, blocks and custom data.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SnapshotError;
use crate::shard::{NodeId, ShardCopy, ShardId, UnassignedInfo, UnassignedReason};

/// A live cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Node ID
    pub id: NodeId,
    /// Human readable name
    #[serde(default)]
    pub name: String,
    /// Node attributes (rack, zone, ...), used for awareness counts
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Whether the node holds shard data
    #[serde(default = "default_data")]
    pub data: bool,
}

fn default_data() -> bool {
    true
}

impl ClusterNode {
    /// Create a data node
    pub fn new(id: impl Into<NodeId>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            attributes: BTreeMap::new(),
            data: true,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Mark as a coordinating/master-only node
    pub fn without_data(mut self) -> Self {
        self.data = false;
        self
    }
}

/// All copies of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShardRoutingTable {
    pub shard_id: ShardId,
    /// Primary and replica copies; relocation targets are never stored here
    pub copies: Vec<ShardCopy>,
}

impl IndexShardRoutingTable {
    pub fn new(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            copies: Vec::new(),
        }
    }

    /// The canonical primary copy
    ///
    /// A relocation target found in the input is never canonical; the ledger
    /// does not place it.
    pub fn primary(&self) -> Option<&ShardCopy> {
        self.copies.iter().find(|c| c.is_primary() && !c.is_relocation_target())
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ShardCopy> {
        self.copies.iter().filter(|c| !c.is_primary())
    }

    /// Number of copies the shard is expected to have (primary + replicas)
    pub fn size(&self) -> usize {
        self.copies.len()
    }
}

/// All shards of one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRoutingTable {
    pub index: String,
    pub shards: BTreeMap<u32, IndexShardRoutingTable>,
}

impl IndexRoutingTable {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            shards: BTreeMap::new(),
        }
    }

    pub fn shard(&self, shard: u32) -> Option<&IndexShardRoutingTable> {
        self.shards.get(&shard)
    }
}

/// Routing table
///
/// Contains every copy of every shard, assigned or not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Routing table version number (incremented on each change)
    pub version: u64,
    pub indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn index(&self, index: &str) -> Option<&IndexRoutingTable> {
        self.indices.get(index)
    }

    pub fn shard(&self, shard_id: &ShardId) -> Option<&IndexShardRoutingTable> {
        self.indices.get(&shard_id.index)?.shard(shard_id.shard)
    }

    /// Expected copy count of a shard, 0 if the shard is unknown
    pub fn expected_copies(&self, shard_id: &ShardId) -> usize {
        self.shard(shard_id).map(|s| s.size()).unwrap_or(0)
    }

    pub fn shard_tables(&self) -> impl Iterator<Item = &IndexShardRoutingTable> {
        self.indices.values().flat_map(|i| i.shards.values())
    }

    pub fn copies(&self) -> impl Iterator<Item = &ShardCopy> {
        self.shard_tables().flat_map(|s| s.copies.iter())
    }

    /// Append a copy to its shard table, creating the table if needed
    pub fn add_copy(&mut self, copy: ShardCopy) {
        let shard_id = copy.shard_id().clone();
        self.indices
            .entry(shard_id.index.clone())
            .or_insert_with(|| IndexRoutingTable::new(shard_id.index.clone()))
            .shards
            .entry(shard_id.shard)
            .or_insert_with(|| IndexShardRoutingTable::new(shard_id.clone()))
            .copies
            .push(copy);
    }
}

/// Index metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl IndexMetadata {
    pub fn new(name: impl Into<String>, number_of_shards: u32, number_of_replicas: u32) -> Self {
        Self {
            name: name.into(),
            number_of_shards,
            number_of_replicas,
            settings: BTreeMap::new(),
        }
    }
}

/// Cluster metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub indices: BTreeMap<String, IndexMetadata>,
}

impl Metadata {
    pub fn index(&self, name: &str) -> Option<&IndexMetadata> {
        self.indices.get(name)
    }
}

/// Cluster blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBlocks {
    #[serde(default)]
    pub global: BTreeSet<String>,
    #[serde(default)]
    pub indices: BTreeMap<String, BTreeSet<String>>,
}

impl ClusterBlocks {
    pub fn has_global_block(&self, block: &str) -> bool {
        self.global.contains(block)
    }

    pub fn has_index_block(&self, index: &str, block: &str) -> bool {
        self.global.contains(block)
            || self.indices.get(index).map(|b| b.contains(block)).unwrap_or(false)
    }
}

/// Cluster snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub cluster_name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, ClusterNode>,
    #[serde(default)]
    pub routing_table: RoutingTable,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub blocks: ClusterBlocks,
    /// Arbitrary extension data
    #[serde(default)]
    pub customs: BTreeMap<String, serde_json::Value>,
}

impl ClusterSnapshot {
    pub fn builder(cluster_name: impl Into<String>) -> ClusterSnapshotBuilder {
        ClusterSnapshotBuilder::new(cluster_name)
    }

    /// Nodes that hold shard data
    pub fn data_nodes(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.values().filter(|n| n.data)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(json).map_err(|e| SnapshotError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Serialization(e.to_string()))
    }

    /// Load a snapshot from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SnapshotError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let snapshot = Self::from_json(&content)?;
        info!(
            "Loaded cluster snapshot '{}': {} nodes, {} indices, routing version {}",
            snapshot.cluster_name,
            snapshot.nodes.len(),
            snapshot.routing_table.indices.len(),
            snapshot.routing_table.version
        );
        Ok(snapshot)
    }

    /// Save a snapshot to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        // Write to temp file first, then atomically rename
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, self.to_json()?)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Builder for [`ClusterSnapshot`]
#[derive(Debug, Clone)]
pub struct ClusterSnapshotBuilder {
    snapshot: ClusterSnapshot,
}

impl ClusterSnapshotBuilder {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            snapshot: ClusterSnapshot {
                cluster_name: cluster_name.into(),
                ..Default::default()
            },
        }
    }

    pub fn node(mut self, node: ClusterNode) -> Self {
        self.snapshot.nodes.insert(node.id.clone(), node);
        self
    }

    /// Add plain data nodes by id
    pub fn data_nodes<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        for id in ids {
            let node = ClusterNode::new(id);
            self.snapshot.nodes.insert(node.id.clone(), node);
        }
        self
    }

    /// Create an index whose copies are all unassigned
    pub fn index(mut self, name: &str, shards: u32, replicas: u32) -> Self {
        self.snapshot
            .metadata
            .indices
            .insert(name.to_string(), IndexMetadata::new(name, shards, replicas));
        let mut table = IndexRoutingTable::new(name);
        for shard in 0..shards {
            let shard_id = ShardId::new(name, shard);
            let mut shard_table = IndexShardRoutingTable::new(shard_id.clone());
            for copy in 0..=replicas {
                shard_table.copies.push(ShardCopy::new_unassigned(
                    shard_id.clone(),
                    copy == 0,
                    UnassignedInfo::new(UnassignedReason::IndexCreated),
                ));
            }
            table.shards.insert(shard, shard_table);
        }
        self.snapshot.routing_table.indices.insert(name.to_string(), table);
        self
    }

    /// Replace the copies of one shard
    pub fn copies(mut self, shard_id: &ShardId, copies: Vec<ShardCopy>) -> Self {
        let table = self
            .snapshot
            .routing_table
            .indices
            .entry(shard_id.index.clone())
            .or_insert_with(|| IndexRoutingTable::new(shard_id.index.clone()));
        let shard_table = table
            .shards
            .entry(shard_id.shard)
            .or_insert_with(|| IndexShardRoutingTable::new(shard_id.clone()));
        shard_table.copies = copies;
        self
    }

    pub fn routing_table(mut self, routing_table: RoutingTable) -> Self {
        self.snapshot.routing_table = routing_table;
        self
    }

    pub fn global_block(mut self, block: impl Into<String>) -> Self {
        self.snapshot.blocks.global.insert(block.into());
        self
    }

    pub fn index_block(mut self, index: impl Into<String>, block: impl Into<String>) -> Self {
        self.snapshot
            .blocks
            .indices
            .entry(index.into())
            .or_default()
            .insert(block.into());
        self
    }

    pub fn custom(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.snapshot.customs.insert(key.into(), value);
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.snapshot.version = version;
        self
    }

    pub fn build(self) -> ClusterSnapshot {
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creates_unassigned_index() {
        let snapshot = ClusterSnapshot::builder("test")
            .data_nodes(["n1", "n2"])
            .index("logs", 2, 1)
            .build();

        assert_eq!(snapshot.data_nodes().count(), 2);
        assert_eq!(snapshot.routing_table.copies().count(), 4);
        let shard = snapshot.routing_table.shard(&ShardId::new("logs", 1)).unwrap();
        assert_eq!(shard.size(), 2);
        assert!(shard.primary().unwrap().is_unassigned());
        assert_eq!(shard.replicas().count(), 1);
        assert_eq!(snapshot.metadata.index("logs").unwrap().number_of_replicas, 1);
    }

    #[test]
    fn test_expected_copies() {
        let snapshot = ClusterSnapshot::builder("test").index("logs", 1, 2).build();
        assert_eq!(snapshot.routing_table.expected_copies(&ShardId::new("logs", 0)), 3);
        assert_eq!(snapshot.routing_table.expected_copies(&ShardId::new("logs", 7)), 0);
    }

    #[test]
    fn test_blocks() {
        let snapshot = ClusterSnapshot::builder("test")
            .global_block("no_master")
            .index_block("logs", "read_only")
            .build();
        assert!(snapshot.blocks.has_global_block("no_master"));
        assert!(snapshot.blocks.has_index_block("logs", "read_only"));
        assert!(snapshot.blocks.has_index_block("other", "no_master"));
        assert!(!snapshot.blocks.has_index_block("other", "read_only"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let shard_id = ShardId::new("logs", 0);
        let snapshot = ClusterSnapshot::builder("test")
            .node(ClusterNode::new("n1").with_attribute("rack", "r1"))
            .index("logs", 1, 0)
            .copies(&shard_id, vec![ShardCopy::new_started(shard_id.clone(), true, "n1")])
            .custom("owner", serde_json::json!({"team": "search"}))
            .version(7)
            .build();

        snapshot.save(&path).unwrap();
        let loaded = ClusterSnapshot::load(&path).unwrap();

        assert_eq!(loaded.cluster_name, "test");
        assert_eq!(loaded.version, 7);
        assert_eq!(loaded.nodes["n1"].attributes["rack"], "r1");
        assert_eq!(loaded.customs["owner"]["team"], "search");
        let copy = loaded.routing_table.shard(&shard_id).unwrap().primary().unwrap();
        assert!(copy.is_started());
        assert_eq!(copy.current_node().map(String::as_str), Some("n1"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ClusterSnapshot::load(dir.path().join("missing.json"));
        assert!(matches!(result, Err(SnapshotError::NotFound(_))));
    }
}
