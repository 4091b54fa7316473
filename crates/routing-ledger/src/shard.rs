//! Shard copy definitions
//!
//! A [`ShardCopy`] is one physical copy (primary or replica) of one shard.
//! Its state transitions live here; the ledger decides when to apply them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Node ID
pub type NodeId = String;

/// Shard ID: index name plus shard number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    /// Index name
    pub index: String,
    /// Shard number within the index
    pub shard: u32,
}

impl ShardId {
    pub fn new(index: impl Into<String>, shard: u32) -> Self {
        Self {
            index: index.into(),
            shard,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.shard)
    }
}

static NEXT_COPY_ID: AtomicU64 = AtomicU64::new(1);

/// Stable handle of a shard copy held by a ledger
///
/// Ids are process-unique and never reused, so removal by handle can never
/// hit an equal-looking copy by mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CopyId(u64);

impl CopyId {
    /// Allocate the next id
    pub fn next() -> Self {
        Self(NEXT_COPY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shard copy state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShardState {
    /// Not assigned to any node
    Unassigned,
    /// Recovering on its current node
    Initializing,
    /// Serving on its current node
    Started,
    /// Serving on its current node while being copied to another
    Relocating,
}

impl ShardState {
    pub fn is_active(&self) -> bool {
        matches!(self, ShardState::Started | ShardState::Relocating)
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardState::Unassigned => write!(f, "UNASSIGNED"),
            ShardState::Initializing => write!(f, "INITIALIZING"),
            ShardState::Started => write!(f, "STARTED"),
            ShardState::Relocating => write!(f, "RELOCATING"),
        }
    }
}

/// Allocation id of an assigned copy
///
/// During a relocation the source carries `relocation_id` and the target
/// carries the mirrored pair, which is how the two halves are matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationId {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relocation_id: Option<String>,
}

impl AllocationId {
    /// Fresh id for a newly initializing copy
    pub fn new_initializing() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            relocation_id: None,
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            relocation_id: None,
        }
    }

    fn start_relocation(&self) -> Self {
        Self {
            id: self.id.clone(),
            relocation_id: Some(Uuid::new_v4().to_string()),
        }
    }

    fn cancel_relocation(&self) -> Self {
        Self {
            id: self.id.clone(),
            relocation_id: None,
        }
    }

    /// Mirrored pair for the relocation target. Falls back to a fresh id if
    /// the source never got a relocation id (malformed snapshot).
    fn relocation_target(&self) -> Self {
        Self {
            id: self
                .relocation_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            relocation_id: Some(self.id.clone()),
        }
    }

    fn finish_relocation(&self) -> Self {
        Self {
            id: self.id.clone(),
            relocation_id: None,
        }
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relocation_id {
            Some(rid) => write!(f, "[id={}, rId={}]", self.id, rid),
            None => write!(f, "[id={}]", self.id),
        }
    }
}

/// Why a copy is unassigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnassignedReason {
    IndexCreated,
    ClusterRecovered,
    NodeLeft,
    AllocationFailed,
    PrimaryFailed,
    RelocationCancelled,
    Reinitialized,
    Manual,
}

impl fmt::Display for UnassignedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnassignedReason::IndexCreated => write!(f, "index_created"),
            UnassignedReason::ClusterRecovered => write!(f, "cluster_recovered"),
            UnassignedReason::NodeLeft => write!(f, "node_left"),
            UnassignedReason::AllocationFailed => write!(f, "allocation_failed"),
            UnassignedReason::PrimaryFailed => write!(f, "primary_failed"),
            UnassignedReason::RelocationCancelled => write!(f, "relocation_cancelled"),
            UnassignedReason::Reinitialized => write!(f, "reinitialized"),
            UnassignedReason::Manual => write!(f, "manual"),
        }
    }
}

/// Explanation attached to an unassigned (or reinitialized) copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedInfo {
    pub reason: UnassignedReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

impl UnassignedInfo {
    pub fn new(reason: UnassignedReason) -> Self {
        Self {
            reason,
            message: None,
            at: Utc::now(),
        }
    }

    pub fn with_message(reason: UnassignedReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: Some(message.into()),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for UnassignedInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[reason={}], at[{}]", self.reason, self.at.to_rfc3339())?;
        if let Some(message) = &self.message {
            write!(f, ", details[{}]", message)?;
        }
        Ok(())
    }
}

/// One physical copy of one shard
///
/// `relocating_node` depends on the state: for a RELOCATING source it is the
/// target node, for an INITIALIZING relocation target it is the source node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCopy {
    #[serde(skip, default = "CopyId::next")]
    id: CopyId,
    shard_id: ShardId,
    primary: bool,
    state: ShardState,
    #[serde(default)]
    current_node: Option<NodeId>,
    #[serde(default)]
    relocating_node: Option<NodeId>,
    #[serde(default)]
    allocation_id: Option<AllocationId>,
    #[serde(default)]
    expected_size: Option<u64>,
    #[serde(default)]
    unassigned_info: Option<UnassignedInfo>,
    #[serde(default)]
    version: u64,
}

impl ShardCopy {
    /// Create an unassigned copy
    pub fn new_unassigned(shard_id: ShardId, primary: bool, info: UnassignedInfo) -> Self {
        Self {
            id: CopyId::next(),
            shard_id,
            primary,
            state: ShardState::Unassigned,
            current_node: None,
            relocating_node: None,
            allocation_id: None,
            expected_size: None,
            unassigned_info: Some(info),
            version: 0,
        }
    }

    /// Create a copy initializing on `node` (snapshot input)
    pub fn new_initializing(shard_id: ShardId, primary: bool, node: impl Into<NodeId>) -> Self {
        Self {
            state: ShardState::Initializing,
            current_node: Some(node.into()),
            allocation_id: Some(AllocationId::new_initializing()),
            unassigned_info: None,
            ..Self::new_unassigned(shard_id, primary, UnassignedInfo::new(UnassignedReason::Manual))
        }
    }

    /// Create a copy started on `node` (snapshot input)
    pub fn new_started(shard_id: ShardId, primary: bool, node: impl Into<NodeId>) -> Self {
        Self {
            state: ShardState::Started,
            ..Self::new_initializing(shard_id, primary, node)
        }
    }

    /// Create a copy relocating from `node` to `target` (snapshot input)
    pub fn new_relocating(
        shard_id: ShardId,
        primary: bool,
        node: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Self {
        let mut copy = Self::new_started(shard_id, primary, node);
        copy.state = ShardState::Relocating;
        copy.relocating_node = Some(target.into());
        copy.allocation_id = copy.allocation_id.as_ref().map(AllocationId::start_relocation);
        copy
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_allocation_id(mut self, allocation_id: AllocationId) -> Self {
        self.allocation_id = Some(allocation_id);
        self
    }

    pub fn id(&self) -> CopyId {
        self.id
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn index(&self) -> &str {
        &self.shard_id.index
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn state(&self) -> ShardState {
        self.state
    }

    pub fn current_node(&self) -> Option<&NodeId> {
        self.current_node.as_ref()
    }

    pub fn relocating_node(&self) -> Option<&NodeId> {
        self.relocating_node.as_ref()
    }

    pub fn allocation_id(&self) -> Option<&AllocationId> {
        self.allocation_id.as_ref()
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    pub fn unassigned_info(&self) -> Option<&UnassignedInfo> {
        self.unassigned_info.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// STARTED or RELOCATING
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_assigned(&self) -> bool {
        self.current_node.is_some()
    }

    pub fn is_unassigned(&self) -> bool {
        self.state == ShardState::Unassigned
    }

    pub fn is_initializing(&self) -> bool {
        self.state == ShardState::Initializing
    }

    pub fn is_started(&self) -> bool {
        self.state == ShardState::Started
    }

    pub fn is_relocating(&self) -> bool {
        self.state == ShardState::Relocating
    }

    /// INITIALIZING copy that is the receiving half of a relocation
    pub fn is_relocation_target(&self) -> bool {
        self.is_initializing() && self.relocating_node.is_some()
    }

    /// Replica recovering from its primary (not from a relocation source)
    pub fn is_initial_replica_recovery(&self) -> bool {
        !self.primary && self.is_initializing() && self.relocating_node.is_none()
    }

    /// Whether `other` is the relocation counterpart of this copy
    ///
    /// Node pointers must mirror each other, and so must the allocation ids
    /// where both sides carry them.
    pub fn is_relocation_pair_of(&self, other: &ShardCopy) -> bool {
        let nodes_mirror = self.shard_id == other.shard_id
            && self.relocating_node.is_some()
            && self.relocating_node == other.current_node
            && other.relocating_node == self.current_node;
        nodes_mirror
            && match (&self.allocation_id, &other.allocation_id) {
                (Some(a), Some(b)) => {
                    a.relocation_id.as_deref().map_or(true, |r| r == b.id)
                        && b.relocation_id.as_deref().map_or(true, |r| r == a.id)
                }
                _ => true,
            }
    }

    fn require(&self, expected: ShardState, expected_name: &'static str) -> LedgerResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.illegal_state(expected_name))
        }
    }

    pub(crate) fn illegal_state(&self, expected: &'static str) -> LedgerError {
        LedgerError::IllegalState {
            copy: self.id,
            shard_id: self.shard_id.clone(),
            expected,
            actual: self.state,
        }
    }

    /// New id, same contents
    pub(crate) fn restamped(mut self) -> Self {
        self.id = CopyId::next();
        self
    }

    /// UNASSIGNED -> INITIALIZING on `node`
    pub(crate) fn initialize(
        &mut self,
        node: NodeId,
        allocation_id: Option<String>,
        expected_size: Option<u64>,
    ) -> LedgerResult<()> {
        self.require(ShardState::Unassigned, "UNASSIGNED")?;
        self.state = ShardState::Initializing;
        self.current_node = Some(node);
        self.relocating_node = None;
        self.allocation_id = Some(match allocation_id {
            Some(id) => AllocationId::with_id(id),
            None => AllocationId::new_initializing(),
        });
        self.expected_size = expected_size;
        self.version += 1;
        Ok(())
    }

    /// STARTED -> RELOCATING towards `target`
    pub(crate) fn relocate(&mut self, target: NodeId, expected_size: Option<u64>) -> LedgerResult<()> {
        self.require(ShardState::Started, "STARTED")?;
        self.state = ShardState::Relocating;
        self.relocating_node = Some(target);
        self.allocation_id = self.allocation_id.as_ref().map(AllocationId::start_relocation);
        if expected_size.is_some() {
            self.expected_size = expected_size;
        }
        self.version += 1;
        Ok(())
    }

    /// The INITIALIZING counterpart of a RELOCATING copy
    pub(crate) fn build_relocation_target(&self) -> LedgerResult<ShardCopy> {
        self.require(ShardState::Relocating, "RELOCATING")?;
        Ok(Self {
            id: CopyId::next(),
            shard_id: self.shard_id.clone(),
            primary: self.primary,
            state: ShardState::Initializing,
            current_node: self.relocating_node.clone(),
            relocating_node: self.current_node.clone(),
            allocation_id: self.allocation_id.as_ref().map(AllocationId::relocation_target),
            expected_size: self.expected_size,
            unassigned_info: None,
            version: self.version,
        })
    }

    /// INITIALIZING -> STARTED
    pub(crate) fn move_to_started(&mut self) -> LedgerResult<()> {
        self.require(ShardState::Initializing, "INITIALIZING")?;
        self.state = ShardState::Started;
        self.relocating_node = None;
        self.allocation_id = self.allocation_id.as_ref().map(AllocationId::finish_relocation);
        self.unassigned_info = None;
        self.version += 1;
        Ok(())
    }

    /// RELOCATING -> STARTED
    pub(crate) fn cancel_relocation(&mut self) -> LedgerResult<()> {
        self.require(ShardState::Relocating, "RELOCATING")?;
        self.state = ShardState::Started;
        self.relocating_node = None;
        self.allocation_id = self.allocation_id.as_ref().map(AllocationId::cancel_relocation);
        self.version += 1;
        Ok(())
    }

    /// STARTED -> INITIALIZING on the same node, with a fresh allocation id
    pub(crate) fn reinitialize(&mut self) -> LedgerResult<()> {
        self.require(ShardState::Started, "STARTED")?;
        self.state = ShardState::Initializing;
        self.allocation_id = Some(AllocationId::new_initializing());
        self.unassigned_info = Some(UnassignedInfo::new(UnassignedReason::Reinitialized));
        self.version += 1;
        Ok(())
    }

    /// A fresh UNASSIGNED clone of this copy
    pub(crate) fn to_unassigned(&self, info: UnassignedInfo) -> ShardCopy {
        Self {
            id: CopyId::next(),
            shard_id: self.shard_id.clone(),
            primary: self.primary,
            state: ShardState::Unassigned,
            current_node: None,
            relocating_node: None,
            allocation_id: None,
            expected_size: None,
            unassigned_info: Some(info),
            version: self.version + 1,
        }
    }

    pub(crate) fn swap_primary(&mut self) {
        self.primary = !self.primary;
        self.version += 1;
    }
}

impl fmt::Display for ShardCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, node[{}], ", self.shard_id, self.current_node.as_deref().unwrap_or("null"))?;
        if let Some(relocating) = &self.relocating_node {
            if self.is_relocating() {
                write!(f, "relocating to [{}], ", relocating)?;
            } else {
                write!(f, "relocating from [{}], ", relocating)?;
            }
        }
        write!(f, "[{}], v[{}], s[{}]", if self.primary { "P" } else { "R" }, self.version, self.state)?;
        if let Some(allocation_id) = &self.allocation_id {
            write!(f, ", a{}", allocation_id)?;
        }
        if let Some(size) = self.expected_size {
            write!(f, ", expected_size[{}]", size)?;
        }
        if let Some(info) = &self.unassigned_info {
            write!(f, ", unassigned_info[{}]", info)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard() -> ShardId {
        ShardId::new("logs", 0)
    }

    #[test]
    fn test_copy_ids_are_unique() {
        let a = ShardCopy::new_unassigned(shard(), true, UnassignedInfo::new(UnassignedReason::IndexCreated));
        let b = a.clone().restamped();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.shard_id(), b.shard_id());
    }

    #[test]
    fn test_initialize_then_start() {
        let mut copy = ShardCopy::new_unassigned(shard(), true, UnassignedInfo::new(UnassignedReason::IndexCreated));
        copy.initialize("n1".to_string(), None, Some(10)).unwrap();
        assert!(copy.is_initializing());
        assert!(!copy.is_active());
        assert_eq!(copy.current_node().map(String::as_str), Some("n1"));
        assert!(copy.allocation_id().is_some());

        copy.move_to_started().unwrap();
        assert!(copy.is_started());
        assert!(copy.is_active());
        assert!(copy.unassigned_info().is_none());
        assert_eq!(copy.version(), 2);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut copy = ShardCopy::new_started(shard(), false, "n1");
        assert!(matches!(
            copy.initialize("n2".to_string(), None, None),
            Err(LedgerError::IllegalState { expected: "UNASSIGNED", .. })
        ));
        assert!(copy.move_to_started().is_err());
        assert!(copy.cancel_relocation().is_err());
        assert!(copy.build_relocation_target().is_err());
    }

    #[test]
    fn test_relocation_pair() {
        let mut source = ShardCopy::new_started(shard(), true, "n1");
        source.relocate("n2".to_string(), Some(100)).unwrap();
        let target = source.build_relocation_target().unwrap();

        assert!(source.is_relocating());
        assert!(target.is_relocation_target());
        assert_eq!(target.current_node().map(String::as_str), Some("n2"));
        assert_eq!(target.relocating_node().map(String::as_str), Some("n1"));
        assert_eq!(target.expected_size(), Some(100));
        assert!(source.is_relocation_pair_of(&target));
        assert!(target.is_relocation_pair_of(&source));

        // same nodes, different relocation
        let mut other = ShardCopy::new_started(shard(), false, "n1");
        other.relocate("n2".to_string(), None).unwrap();
        let other_target = other.build_relocation_target().unwrap();
        assert!(!source.is_relocation_pair_of(&other_target));

        let source_alloc = source.allocation_id().unwrap();
        let target_alloc = target.allocation_id().unwrap();
        assert_eq!(source_alloc.relocation_id.as_ref(), Some(&target_alloc.id));
        assert_eq!(target_alloc.relocation_id.as_ref(), Some(&source_alloc.id));
    }

    #[test]
    fn test_cancel_relocation_restores_started() {
        let mut copy = ShardCopy::new_started(shard(), true, "n1");
        copy.relocate("n2".to_string(), None).unwrap();
        copy.cancel_relocation().unwrap();
        assert!(copy.is_started());
        assert!(copy.relocating_node().is_none());
        assert!(copy.allocation_id().unwrap().relocation_id.is_none());
    }

    #[test]
    fn test_to_unassigned_keeps_role() {
        let copy = ShardCopy::new_started(shard(), true, "n1").with_expected_size(5);
        let info = UnassignedInfo::with_message(UnassignedReason::NodeLeft, "node n1 left");
        let unassigned = copy.to_unassigned(info);
        assert!(unassigned.is_unassigned());
        assert!(unassigned.is_primary());
        assert!(unassigned.current_node().is_none());
        assert_ne!(unassigned.id(), copy.id());
        assert_eq!(unassigned.unassigned_info().unwrap().reason, UnassignedReason::NodeLeft);
    }

    #[test]
    fn test_serde_assigns_fresh_ids() {
        let copy = ShardCopy::new_relocating(shard(), true, "n1", "n2");
        let json = serde_json::to_string(&copy).unwrap();
        let decoded: ShardCopy = serde_json::from_str(&json).unwrap();
        assert_ne!(decoded.id(), copy.id());
        assert_eq!(decoded.state(), ShardState::Relocating);
        assert_eq!(decoded.relocating_node().map(String::as_str), Some("n2"));
    }
}
