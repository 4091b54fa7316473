//! Routing Ledger - shard routing bookkeeping for a scheduling pass
//!
//! Records where every shard copy of every index lives, where it is moving
//! to, and which copies are waiting for a node. The scheduler decides where
//! copies go; the ledger keeps the derived counters (inactive, relocating,
//! per-node recoveries, unassigned primaries) exactly in step with the
//! per-node shard lists.
//!
//! # Features
//! - Ledger construction from a cluster snapshot, owned or as a shared read-only view
//! - Initialize, relocate, start, cancel, swap role, reinitialize and remove operations
//! - Per-node incoming/outgoing recovery accounting
//! - Unassigned queue with ignored side-list
//! - Full-recomputation consistency checker
//!
//! # Usage Example
//! ```ignore
//! use routing_ledger::{ClusterSnapshot, LedgerMode, RoutingLedger};
//!
//! let snapshot = ClusterSnapshot::builder("prod")
//!     .data_nodes(["n1", "n2"])
//!     .index("logs", 1, 1)
//!     .build();
//! let mut ledger = RoutingLedger::new(snapshot.into_shared(), LedgerMode::Mutable)?;
//! let mut cursor = ledger.unassigned_cursor();
//! while let Some(copy) = cursor.next() {
//!     if copy.is_primary() {
//!         cursor.initialize("n1", None, None)?;
//!     } else {
//!         cursor.remove_and_ignore()?;
//!     }
//! }
//! ledger.assert_consistent();
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod recovery;
pub mod shard;
pub mod snapshot;
pub mod transition;
pub mod unassigned;

// Re-export commonly used types
pub use config::{Config, LedgerConfig, LogConfig};
pub use error::{ConfigError, ConsistencyError, LedgerError, LedgerResult, SnapshotError};
pub use ledger::{LedgerMode, LedgerStats, LedgerView, NodeCursor, RoutingLedger, RoutingNode, UnassignedCursor};
pub use recovery::{Recoveries, RecoveryLedger};
pub use shard::{
    AllocationId, CopyId, NodeId, ShardCopy, ShardId, ShardState, UnassignedInfo, UnassignedReason,
};
pub use snapshot::{
    ClusterBlocks, ClusterNode, ClusterSnapshot, ClusterSnapshotBuilder, IndexMetadata,
    IndexRoutingTable, IndexShardRoutingTable, Metadata, RoutingTable,
};
pub use transition::RoutingCounters;
pub use unassigned::UnassignedQueue;
