//! Aggregate counter bookkeeping
//!
//! Every ledger mutation describes itself as a [`Transition`] and applies
//! the resulting [`CounterDelta`]; no call site touches the counters
//! directly.

use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};
use crate::shard::ShardCopy;

/// The role-relevant facts of a copy at the moment of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyFacts {
    pub primary: bool,
    pub active: bool,
    pub relocating: bool,
    pub relocation_target: bool,
}

impl CopyFacts {
    pub fn of(copy: &ShardCopy) -> Self {
        Self {
            primary: copy.is_primary(),
            active: copy.is_active(),
            relocating: copy.is_relocating(),
            relocation_target: copy.is_relocation_target(),
        }
    }

    /// Whether the copy counts towards the inactive counters
    fn counts_inactive(&self) -> bool {
        !self.active && !self.relocation_target
    }
}

/// A state transition of one assigned copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// UNASSIGNED -> INITIALIZING
    Initialize { primary: bool },
    /// STARTED -> RELOCATING (the target copy is not counted as inactive)
    Relocate,
    /// INITIALIZING -> STARTED
    Start { before: CopyFacts },
    /// RELOCATING -> STARTED
    CancelRelocation,
    /// STARTED -> INITIALIZING in place
    Reinitialize { primary: bool },
    /// The copy leaves its node
    Remove { before: CopyFacts },
    /// The copy's primary flag flips
    SwapPrimary { before: CopyFacts },
}

/// Signed change of each aggregate counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub inactive_shards: i64,
    pub inactive_primaries: i64,
    pub relocating_shards: i64,
}

impl Transition {
    pub fn delta(&self) -> CounterDelta {
        match *self {
            Transition::Initialize { primary } | Transition::Reinitialize { primary } => CounterDelta {
                inactive_shards: 1,
                inactive_primaries: i64::from(primary),
                relocating_shards: 0,
            },
            Transition::Relocate => CounterDelta {
                relocating_shards: 1,
                ..Default::default()
            },
            Transition::Start { before } => {
                if before.counts_inactive() {
                    CounterDelta {
                        inactive_shards: -1,
                        inactive_primaries: -i64::from(before.primary),
                        relocating_shards: 0,
                    }
                } else {
                    CounterDelta::default()
                }
            }
            Transition::CancelRelocation => CounterDelta {
                relocating_shards: -1,
                ..Default::default()
            },
            Transition::Remove { before } => {
                if before.counts_inactive() {
                    CounterDelta {
                        inactive_shards: -1,
                        inactive_primaries: -i64::from(before.primary),
                        relocating_shards: 0,
                    }
                } else if before.relocating {
                    CounterDelta {
                        relocating_shards: -1,
                        ..Default::default()
                    }
                } else {
                    CounterDelta::default()
                }
            }
            Transition::SwapPrimary { before } => {
                if before.counts_inactive() {
                    CounterDelta {
                        inactive_primaries: if before.primary { -1 } else { 1 },
                        ..Default::default()
                    }
                } else {
                    CounterDelta::default()
                }
            }
        }
    }
}

/// Aggregate counters of a routing ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoutingCounters {
    pub inactive_shards: usize,
    pub inactive_primaries: usize,
    pub relocating_shards: usize,
}

impl RoutingCounters {
    /// Apply a transition; fails without change if any counter would go negative
    pub fn apply(&mut self, transition: Transition) -> LedgerResult<()> {
        let delta = transition.delta();
        let next = Self {
            inactive_shards: adjust(self.inactive_shards, delta.inactive_shards, "inactive_shards")?,
            inactive_primaries: adjust(
                self.inactive_primaries,
                delta.inactive_primaries,
                "inactive_primaries",
            )?,
            relocating_shards: adjust(self.relocating_shards, delta.relocating_shards, "relocating_shards")?,
        };
        *self = next;
        Ok(())
    }
}

fn adjust(value: usize, delta: i64, counter: &'static str) -> LedgerResult<usize> {
    let next = value as i64 + delta;
    if next < 0 {
        return Err(LedgerError::CounterUnderflow {
            counter,
            scope: "cluster".to_string(),
        });
    }
    Ok(next as usize)
}
