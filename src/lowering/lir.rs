//! Lowered representation
//!
//! Output of the lowering pass: a flat [`Instr`] sequence plus the
//! `StateId -> landing label` jump table, bundled as a [`Machine`]. The
//! synchronous reduction produces a [`SyncStmt`] tree instead.

use crate::types::{BinOp, Label, RegionId, StateId, Val};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/* ===================== Values ===================== */

/// Lowered expression. Contains no suspension points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Value {
    Lit {
        v: Val,
    },
    Local {
        name: String,
    },
    Binary {
        op: BinOp,
        lhs: Box<Value>,
        rhs: Box<Value>,
    },
    Call {
        function: String,
        args: Vec<Value>,
    },
    ObtainAwaiter {
        value: Box<Value>,
    },
    /// Fetch the result from an awaiter; `state` is set when the awaiter belongs
    /// to a numbered suspension point
    FetchResult {
        awaiter: Box<Value>,
        state: Option<StateId>,
    },
}

impl Value {
    pub fn local(name: impl Into<String>) -> Self {
        Value::Local { name: name.into() }
    }

    pub fn null() -> Self {
        Value::Lit { v: Val::Null }
    }

    /// Whether evaluating this value can observe nothing a suspension could change
    pub fn is_stable(&self) -> bool {
        matches!(self, Value::Lit { .. } | Value::Local { .. })
    }
}

/* ===================== Instructions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Instr {
    Label {
        label: Label,
    },
    Assign {
        local: String,
        value: Value,
    },
    Eval {
        value: Value,
    },
    Jump {
        target: Label,
    },
    JumpIfFalse {
        test: Value,
        target: Label,
    },
    /// Push a guard frame; faults and returns unwind through `finally`
    EnterGuard {
        region: RegionId,
        finally: Label,
    },
    /// Pop the guard frame pushed by the matching `EnterGuard`
    LeaveGuard {
        region: RegionId,
    },
    /// Release the resource held in `holder` if any, then clear the holder
    Release {
        holder: String,
    },
    /// End of a finally block: re-raise the pending fault or return, if any
    EndFinally,
    MarkGuardExited {
        region: RegionId,
    },
    /// Record `state` as current and yield unless the awaiter is already complete
    Transition {
        state: StateId,
        awaiter: String,
        landing: Label,
    },
    Return {
        value: Value,
    },
    /// Hand control back to the caller of `step`
    ReturnToCaller,
}

/* ===================== Synchronous Form ===================== */

/// Statement tree produced by the synchronous reduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum SyncStmt {
    Nop,
    Block {
        body: Vec<SyncStmt>,
    },
    Assign {
        local: String,
        value: Value,
    },
    Eval {
        value: Value,
    },
    If {
        test: Value,
        then_s: Box<SyncStmt>,
        else_s: Option<Box<SyncStmt>>,
    },
    While {
        test: Value,
        body: Box<SyncStmt>,
    },
    Return {
        value: Value,
    },
    TryFinally {
        body: Box<SyncStmt>,
        finally: Box<SyncStmt>,
    },
    Release {
        holder: String,
    },
}

/* ===================== Machine ===================== */

/// A guarded region and the span of StateIds lowered inside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub id: RegionId,
    pub holder: String,
    pub finally: Label,
    /// First StateId assigned inside the region
    pub first_state: u32,
    /// One past the last StateId assigned inside the region
    pub end_state: u32,
    pub parent: Option<RegionId>,
}

impl RegionInfo {
    pub fn encloses(&self, state: StateId) -> bool {
        (self.first_state..self.end_state).contains(&state.0)
    }
}

/// Lowered state machine, ready for an evaluation host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub instrs: Vec<Instr>,
    /// Instruction index of each label, indexed by label number
    pub labels: Vec<usize>,
    pub jump_table: BTreeMap<StateId, Label>,
    pub return_label: Label,
    pub regions: Vec<RegionInfo>,
    /// Hoisted locals, including awaiter and resource holders
    pub locals: Vec<String>,
}

impl Machine {
    pub fn state_count(&self) -> usize {
        self.jump_table.len()
    }

    /// StateIds in emission order
    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.instrs.iter().filter_map(|instr| match instr {
            Instr::Transition { state, .. } => Some(*state),
            _ => None,
        })
    }

    pub fn position(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied()
    }

    pub fn landing(&self, state: StateId) -> Option<Label> {
        self.jump_table.get(&state).copied()
    }

    /// Regions enclosing a suspension point, innermost first
    pub fn regions_enclosing(&self, state: StateId) -> Vec<RegionId> {
        let mut chain: Vec<&RegionInfo> =
            self.regions.iter().filter(|r| r.encloses(state)).collect();
        // Regions are recorded as they close, so nested ones come first already;
        // sort by span width to be independent of that.
        chain.sort_by_key(|r| (r.end_state - r.first_state, std::cmp::Reverse(r.id)));
        chain.into_iter().map(|r| r.id).collect()
    }

    /// Awaiter holder name for a suspension point
    pub fn awaiter_holder(state: StateId) -> String {
        format!("$awaiter{}", state.0)
    }

    /// SHA-256 of the canonical listing
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.to_string().as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/* ===================== Listing ===================== */

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Lit { v } => write!(f, "{}", v),
            Value::Local { name } => f.write_str(name),
            Value::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
            Value::Call { function, args } => {
                write!(f, "{}(", function)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Value::ObtainAwaiter { value } => write!(f, "obtain_awaiter({})", value),
            Value::FetchResult { awaiter, .. } => write!(f, "fetch_result({})", awaiter),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Label { label } => write!(f, "{}:", label),
            Instr::Assign { local, value } => write!(f, "    {} := {}", local, value),
            Instr::Eval { value } => write!(f, "    eval {}", value),
            Instr::Jump { target } => write!(f, "    jump {}", target),
            Instr::JumpIfFalse { test, target } => {
                write!(f, "    jump_if_false {} {}", test, target)
            }
            Instr::EnterGuard { region, finally } => {
                write!(f, "    enter_guard {} finally {}", region, finally)
            }
            Instr::LeaveGuard { region } => write!(f, "    leave_guard {}", region),
            Instr::Release { holder } => write!(f, "    release {}", holder),
            Instr::EndFinally => write!(f, "    end_finally"),
            Instr::MarkGuardExited { region } => write!(f, "    mark_guard_exited {}", region),
            Instr::Transition {
                state,
                awaiter,
                landing,
            } => write!(f, "    transition {} [{}] -> {}", state, awaiter, landing),
            Instr::Return { value } => write!(f, "    return {}", value),
            Instr::ReturnToCaller => write!(f, "    return_to_caller"),
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instrs {
            writeln!(f, "{}", instr)?;
        }
        writeln!(f, "; return {}", self.return_label)?;
        for (state, label) in &self.jump_table {
            writeln!(f, "; {} -> {}", state, label)?;
        }
        Ok(())
    }
}
