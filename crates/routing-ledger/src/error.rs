//! Error types
//!
//! State-precondition violations are returned as [`LedgerError`] and are
//! meant to abort the scheduling pass that triggered them.

use std::path::PathBuf;

use thiserror::Error;

use crate::shard::{CopyId, NodeId, ShardId, ShardState};

/// Result alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Routing ledger is read-only")]
    ReadOnly,
    #[error("Shard copy {copy} of {shard_id} is {actual}, expected {expected}")]
    IllegalState {
        copy: CopyId,
        shard_id: ShardId,
        expected: &'static str,
        actual: ShardState,
    },
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),
    #[error("Unknown shard copy: {0}")]
    UnknownCopy(CopyId),
    #[error("No primary found to recover replica of {0} from")]
    NoPrimaryForRecovery(ShardId),
    #[error("Cursor has no current element")]
    NoCurrentElement,
    #[error("Counter {counter} would underflow ({scope})")]
    CounterUnderflow {
        counter: &'static str,
        scope: String,
    },
}

/// A mismatch found by the consistency checker
///
/// Any of these means the ledger's incremental bookkeeping diverged from
/// its per-node lists: a programming error, never a recoverable condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("Counter {counter}: maintained {maintained}, recomputed {recomputed}")]
    Counter {
        counter: &'static str,
        maintained: usize,
        recomputed: usize,
    },
    #[error("Shard index for {shard_id}: indexed {indexed:?}, on nodes {on_nodes:?}")]
    ShardIndex {
        shard_id: ShardId,
        indexed: Vec<CopyId>,
        on_nodes: Vec<CopyId>,
    },
    #[error("Copy {copy} is located on {located:?} but listed on {listed:?}")]
    Location {
        copy: CopyId,
        located: Option<NodeId>,
        listed: Option<NodeId>,
    },
    #[error("Recoveries on {node} ({direction}): maintained {maintained}, recomputed {recomputed}")]
    Recoveries {
        node: NodeId,
        direction: &'static str,
        maintained: u32,
        recomputed: u32,
    },
    #[error("Unassigned queue holds {0} which is not unassigned")]
    NotUnassigned(CopyId),
}

/// Snapshot load/save errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("File not found: {0}")]
    NotFound(PathBuf),
}

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}

