//! # Lowering Pass
//!
//! Turns a composed [`Node`] tree into a [`Machine`]: one flat instruction
//! sequence for the step function plus a `StateId -> landing label` jump table.
//!
//! ## Traversal
//!
//! Depth-first, left-to-right, in execution order. A running counter hands out
//! StateIds to suspension points as they are reached, so identical trees always
//! number identically; a driver resuming from a persisted snapshot relies on it.
//!
//! ## Layout
//!
//! ```text
//! L0 is the terminal return label
//!     <body>
//!     return null                     ; implicit end of body
//! L0:
//!     return_to_caller                ; every yield jumps here
//! ```
//!
//! Subexpressions evaluated before an await inside the same expression are
//! spilled into `$tN` locals so they keep their left-to-right order.

pub mod guard;
pub mod lir;
pub mod scope;

#[cfg(test)]
mod tests;

use crate::error::LoweringError;
use crate::nodes::{PlaceholderNode, PlaceholderRegistry, Reduce};
use crate::types::{Expr, Label, Node, RegionId, StateId};
use guard::GuardCoordinator;
use lir::{Instr, Machine, RegionInfo, SyncStmt, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/* ===================== Public API ===================== */

/// Lower a tree that uses no placeholders
pub fn lower(node: &Node) -> Result<Machine, LoweringError> {
    lower_with(node, PlaceholderRegistry::new())
}

/// Lower a tree whose guard exits reference placeholders allocated from `registry`
pub fn lower_with(node: &Node, registry: PlaceholderRegistry) -> Result<Machine, LoweringError> {
    let mut cx = Lowering::new(registry);
    cx.lower_node(node)?;
    cx.finish()
}

/// Synchronous reduction of a whole tree
pub fn reduce_sync(node: &Node) -> SyncStmt {
    SyncReduction::default().node(node)
}

/* ===================== Lowering Context ===================== */

/// State of one lowering pass; also the prologue sink node reductions emit into
#[derive(Debug)]
pub struct Lowering {
    instrs: Vec<Instr>,
    labels: Vec<Option<usize>>,
    jump_table: BTreeMap<StateId, Label>,
    next_state: u32,
    next_spill: u32,
    return_label: Label,
    guards: GuardCoordinator,
    regions: Vec<RegionInfo>,
    locals: BTreeSet<String>,
    placeholders: PlaceholderRegistry,
}

impl Lowering {
    fn new(placeholders: PlaceholderRegistry) -> Self {
        let mut cx = Self {
            instrs: Vec::new(),
            labels: Vec::new(),
            jump_table: BTreeMap::new(),
            next_state: 0,
            next_spill: 0,
            return_label: Label(0),
            guards: GuardCoordinator::new(),
            regions: Vec::new(),
            locals: BTreeSet::new(),
            placeholders,
        };
        cx.return_label = cx.fresh_label();
        cx
    }

    pub fn next_state(&mut self) -> StateId {
        let state = StateId(self.next_state);
        self.next_state += 1;
        state
    }

    pub fn fresh_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    pub fn return_label(&self) -> Label {
        self.return_label
    }

    pub fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Anchor `label` at the current end of the sequence
    pub fn place(&mut self, label: Label) {
        self.labels[label.0 as usize] = Some(self.instrs.len());
        self.emit(Instr::Label { label });
    }

    pub fn declare(&mut self, local: &str) {
        self.locals.insert(local.to_string());
    }

    pub fn record_landing(&mut self, state: StateId, landing: Label) {
        self.jump_table.insert(state, landing);
    }

    /// Guard-exit marks for every open region, ahead of a yield
    pub fn emit_guard_exits(&mut self) {
        for mark in self.guards.exit_marks() {
            self.emit(mark);
        }
    }

    /// Guard exit naming a region that is resolved during finalization
    pub fn emit_deferred_guard_exit(&mut self, placeholder: PlaceholderNode) {
        self.guards.defer(self.instrs.len(), placeholder);
        self.emit(Instr::MarkGuardExited {
            region: RegionId(u32::MAX),
        });
    }

    /// Holder local for the resource of the next region
    pub fn resource_holder(&self) -> String {
        format!("$resource{}", self.guards.next_id().0)
    }

    pub fn open_region(&mut self, holder: String, finally: Label) -> RegionId {
        let region = self.guards.open(holder, finally, self.next_state);
        trace!(%region, depth = self.guards.depth(), "opened guarded region");
        region
    }

    pub fn close_region(&mut self) {
        if let Some(info) = self.guards.close(self.next_state) {
            trace!(
                region = %info.id,
                states = ?(info.first_state..info.end_state),
                "closed guarded region"
            );
            self.regions.push(info);
        }
    }

    pub fn bind_placeholder(
        &mut self,
        placeholder: PlaceholderNode,
        region: RegionId,
    ) -> Result<(), LoweringError> {
        self.placeholders.resolve(placeholder.id, region)
    }

    /* ===================== Statements ===================== */

    pub fn lower_node(&mut self, node: &Node) -> Result<(), LoweringError> {
        match node {
            Node::Block { body } => {
                for child in body {
                    self.lower_node(child)?;
                }
            }

            Node::Let { name, value } => {
                let value = self.lower_expr(value)?;
                self.declare(name);
                self.emit(Instr::Assign {
                    local: name.clone(),
                    value,
                });
            }

            Node::Expr { expr } => {
                let value = self.lower_expr(expr)?;
                self.emit(Instr::Eval { value });
            }

            Node::If {
                test,
                then_n,
                else_n,
            } => {
                let test = self.lower_expr(test)?;
                let else_label = self.fresh_label();
                let end_label = self.fresh_label();

                self.emit(Instr::JumpIfFalse {
                    test,
                    target: else_label,
                });
                self.lower_node(then_n)?;
                self.emit(Instr::Jump { target: end_label });
                self.place(else_label);
                if let Some(else_n) = else_n {
                    self.lower_node(else_n)?;
                }
                self.place(end_label);
            }

            Node::While { test, body } => {
                let head = self.fresh_label();
                let exit = self.fresh_label();

                self.place(head);
                let test = self.lower_expr(test)?;
                self.emit(Instr::JumpIfFalse { test, target: exit });
                self.lower_node(body)?;
                self.emit(Instr::Jump { target: head });
                self.place(exit);
            }

            Node::Return { value } => {
                let value = match value {
                    Some(expr) => self.lower_expr(expr)?,
                    None => Value::null(),
                };
                self.emit(Instr::Return { value });
            }

            Node::Scoped(scoped) => scoped.reduce_resumable(self)?,

            Node::Transition(transition) => transition.reduce_resumable(self)?,
        }
        Ok(())
    }

    /* ===================== Expressions ===================== */

    pub fn lower_expr(&mut self, expr: &Expr) -> Result<Value, LoweringError> {
        let value = match expr {
            Expr::Local { name, .. } => Value::local(name.clone()),

            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs)?;
                let lhs = if rhs.contains_await() {
                    self.spill(lhs)
                } else {
                    lhs
                };
                let rhs = self.lower_expr(rhs)?;
                Value::Binary {
                    op: *op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                }
            }

            Expr::Call { function, args, .. } => {
                let mut lowered = Vec::with_capacity(args.len());
                for (i, arg) in args.iter().enumerate() {
                    let value = self.lower_expr(arg)?;
                    if args[i + 1..].iter().any(Expr::contains_await) {
                        lowered.push(self.spill(value));
                    } else {
                        lowered.push(value);
                    }
                }
                Value::Call {
                    function: function.clone(),
                    args: lowered,
                }
            }

            Expr::Await(node) => node.reduce_resumable(self)?,

            literal => Value::Lit {
                v: literal.as_literal().unwrap_or(crate::types::Val::Null),
            },
        };
        Ok(value)
    }

    /// Evaluate `value` into a temporary now, ahead of a later suspension
    fn spill(&mut self, value: Value) -> Value {
        if value.is_stable() {
            return value;
        }
        let local = format!("$t{}", self.next_spill);
        self.next_spill += 1;
        self.declare(&local);
        self.emit(Instr::Assign {
            local: local.clone(),
            value,
        });
        Value::local(local)
    }

    /* ===================== Finalization ===================== */

    fn finish(mut self) -> Result<Machine, LoweringError> {
        self.emit(Instr::Return {
            value: Value::null(),
        });
        let return_label = self.return_label;
        self.place(return_label);
        self.emit(Instr::ReturnToCaller);

        self.guards.patch(&mut self.instrs, &self.placeholders)?;
        self.placeholders.finalize()?;

        let labels = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, pos)| pos.ok_or(LoweringError::UnplacedLabel(i as u32)))
            .collect::<Result<Vec<_>, _>>()?;

        let machine = Machine {
            instrs: self.instrs,
            labels,
            jump_table: self.jump_table,
            return_label,
            regions: self.regions,
            locals: self.locals.into_iter().collect(),
        };

        debug!(
            instructions = machine.instrs.len(),
            states = machine.state_count(),
            regions = machine.regions.len(),
            "lowered machine"
        );
        Ok(machine)
    }
}

/* ===================== Synchronous Reduction ===================== */

/// Context of the synchronous reduction: only the scope depth, which names
/// resource holders so nested blocks never share one
#[derive(Debug, Default)]
pub struct SyncReduction {
    depth: u32,
}

impl SyncReduction {
    pub fn enter_scope(&mut self) {
        self.depth += 1;
    }

    pub fn exit_scope(&mut self) {
        self.depth -= 1;
    }

    pub fn resource_holder(&self) -> String {
        format!("$resource{}", self.depth)
    }

    pub fn node(&mut self, node: &Node) -> SyncStmt {
        match node {
            Node::Block { body } => SyncStmt::Block {
                body: body.iter().map(|child| self.node(child)).collect(),
            },
            Node::Let { name, value } => SyncStmt::Assign {
                local: name.clone(),
                value: self.expr(value),
            },
            Node::Expr { expr } => SyncStmt::Eval {
                value: self.expr(expr),
            },
            Node::If {
                test,
                then_n,
                else_n,
            } => SyncStmt::If {
                test: self.expr(test),
                then_s: Box::new(self.node(then_n)),
                else_s: else_n.as_ref().map(|n| Box::new(self.node(n))),
            },
            Node::While { test, body } => SyncStmt::While {
                test: self.expr(test),
                body: Box::new(self.node(body)),
            },
            Node::Return { value } => SyncStmt::Return {
                value: value.as_ref().map_or_else(Value::null, |e| self.expr(e)),
            },
            Node::Scoped(scoped) => scoped.reduce_sync(self),
            Node::Transition(transition) => transition.reduce_sync(self),
        }
    }

    pub fn expr(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Local { name, .. } => Value::local(name.clone()),
            Expr::Binary { op, lhs, rhs } => Value::Binary {
                op: *op,
                lhs: Box::new(self.expr(lhs)),
                rhs: Box::new(self.expr(rhs)),
            },
            Expr::Call { function, args, .. } => Value::Call {
                function: function.clone(),
                args: args.iter().map(|arg| self.expr(arg)).collect(),
            },
            Expr::Await(node) => node.reduce_sync(self),
            literal => Value::Lit {
                v: literal.as_literal().unwrap_or(crate::types::Val::Null),
            },
        }
    }
}
