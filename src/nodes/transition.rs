//! State transitions and guard exits
//!
//! A transition is bound to a numeric id, either directly or through a
//! placeholder that the lowering pass resolves later. Two kinds exist:
//!
//! - `Suspend`: records a StateId as current and yields unless the awaiter is
//!   already complete. Emitted by suspension points, never composed directly;
//!   lowering rejects one found in the tree.
//! - `GuardExit`: tells the driver that guarded regions up to a boundary region
//!   are exited, so cleanup they owe is accounted for exactly once.

use super::placeholder::PlaceholderNode;
use super::Reduce;
use crate::error::LoweringError;
use crate::lowering::lir::{Instr, SyncStmt};
use crate::lowering::{Lowering, SyncReduction};
use crate::types::{Label, RegionId, StateId};
use serde::{Deserialize, Serialize};

/// Id a transition is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Target {
    Bound { id: u32 },
    Deferred { placeholder: PlaceholderNode },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum TransitionKind {
    GuardExit,
    #[serde(skip_deserializing)]
    Suspend { awaiter: String, landing: Label },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionNode {
    target: Target,
    kind: TransitionKind,
}

impl TransitionNode {
    /// Guard exit bound to a known region
    pub fn guard_exit(region: RegionId) -> Self {
        Self {
            target: Target::Bound { id: region.0 },
            kind: TransitionKind::GuardExit,
        }
    }

    /// Guard exit for a region that is defined after this point
    pub fn guard_exit_deferred(placeholder: PlaceholderNode) -> Self {
        Self {
            target: Target::Deferred { placeholder },
            kind: TransitionKind::GuardExit,
        }
    }

    pub(crate) fn suspend(state: StateId, awaiter: String, landing: Label) -> Self {
        Self {
            target: Target::Bound { id: state.0 },
            kind: TransitionKind::Suspend { awaiter, landing },
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn kind(&self) -> &TransitionKind {
        &self.kind
    }

    pub fn is_guard_exit(&self) -> bool {
        self.kind == TransitionKind::GuardExit
    }

    pub(crate) fn emit_into(&self, cx: &mut Lowering) -> Result<(), LoweringError> {
        match (&self.kind, self.target) {
            (TransitionKind::Suspend { awaiter, landing }, Target::Bound { id }) => {
                cx.emit(Instr::Transition {
                    state: StateId(id),
                    awaiter: awaiter.clone(),
                    landing: *landing,
                });
            }
            (TransitionKind::Suspend { .. }, Target::Deferred { placeholder }) => {
                return Err(LoweringError::DeferredSuspend(placeholder.id));
            }
            (TransitionKind::GuardExit, Target::Bound { id }) => {
                cx.emit(Instr::MarkGuardExited {
                    region: RegionId(id),
                });
            }
            (TransitionKind::GuardExit, Target::Deferred { placeholder }) => {
                cx.emit_deferred_guard_exit(placeholder);
            }
        }
        Ok(())
    }
}

impl Reduce for TransitionNode {
    type Sync = SyncStmt;
    type Resumable = ();

    /// Nothing to record when the machine never suspends
    fn reduce_sync(&self, _cx: &mut SyncReduction) -> SyncStmt {
        SyncStmt::Nop
    }

    /// Only guard exits may appear in a composed tree. A suspend transition has no
    /// landing of its own and is only ever emitted by a suspension point.
    fn reduce_resumable(&self, cx: &mut Lowering) -> Result<(), LoweringError> {
        if let (TransitionKind::Suspend { .. }, Target::Bound { id }) = (&self.kind, self.target) {
            return Err(LoweringError::ComposedSuspend(StateId(id)));
        }
        self.emit_into(cx)
    }
}
