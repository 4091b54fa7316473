//! Shared snapshot and ledger builders for the integration tests

#![allow(dead_code)]

use routing_ledger::{ClusterSnapshot, CopyId, LedgerMode, RoutingLedger, ShardId};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Snapshot with `nodes` data nodes named n1..nN and one fully unassigned index
pub fn unassigned_snapshot(nodes: usize, index: &str, shards: u32, replicas: u32) -> ClusterSnapshot {
    ClusterSnapshot::builder("test-cluster")
        .data_nodes((1..=nodes).map(|n| format!("n{}", n)))
        .index(index, shards, replicas)
        .build()
}

/// Mutable ledger that checks itself after every mutation
pub fn mutable_ledger(snapshot: ClusterSnapshot) -> RoutingLedger {
    let mut ledger = RoutingLedger::new(snapshot.into_shared(), LedgerMode::Mutable)
        .expect("ledger construction");
    ledger.set_verify_consistency(true);
    ledger
}

/// Handle of the pending unassigned copy of `shard_id` with the given role
pub fn pending(ledger: &RoutingLedger, shard_id: &ShardId, primary: bool) -> CopyId {
    ledger
        .unassigned()
        .iter()
        .find(|c| c.shard_id() == shard_id && c.is_primary() == primary)
        .map(|c| c.id())
        .expect("pending copy")
}

/// Handle of the copy of `shard_id` on `node_id`
pub fn on_node(ledger: &RoutingLedger, node_id: &str, shard_id: &ShardId) -> CopyId {
    ledger
        .node(node_id)
        .and_then(|n| n.get_by_shard_id(shard_id))
        .map(|c| c.id())
        .expect("copy on node")
}

/// Initialize the pending copy of `shard_id` with the given role on `node_id`
pub fn initialize_pending(ledger: &mut RoutingLedger, shard_id: &ShardId, primary: bool, node_id: &str) -> CopyId {
    let mut cursor = ledger.unassigned_cursor();
    while let Some(copy) = cursor.next() {
        if copy.shard_id() == shard_id && copy.is_primary() == primary {
            return cursor.initialize(node_id, None, None).expect("initialize pending copy");
        }
    }
    panic!("no pending copy of {}", shard_id);
}

/// Initialize the pending primary of `shard_id` on `node_id` and start it
pub fn start_primary(ledger: &mut RoutingLedger, shard_id: &ShardId, node_id: &str) -> CopyId {
    let id = initialize_pending(ledger, shard_id, true, node_id);
    ledger.started(id).unwrap();
    id
}
