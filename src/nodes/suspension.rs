//! Suspension point (await)

use super::transition::TransitionNode;
use super::Reduce;
use crate::error::{ConstructionError, LoweringError};
use crate::lowering::lir::{Instr, Machine, Value};
use crate::lowering::{Lowering, SyncReduction};
use crate::types::{Expr, Label, StateId, Ty};
use serde::{Deserialize, Serialize};

/// Wraps a value whose type exposes obtain-awaiter, and whose awaiter exposes
/// fetch-result. Both capabilities are resolved once, here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SuspensionRepr", into = "SuspensionRepr")]
pub struct SuspensionNode {
    value: Box<Expr>,
    awaiter_ty: Ty,
    result_ty: Ty,
}

#[derive(Serialize, Deserialize)]
struct SuspensionRepr {
    value: Box<Expr>,
}

impl SuspensionNode {
    pub fn new(value: Expr) -> Result<Self, ConstructionError> {
        let value_ty = value.ty();
        let awaiter_ty = value_ty
            .obtain_awaiter()
            .ok_or(ConstructionError::MissingAwaiterCapability { ty: value_ty })?;
        let result_ty = awaiter_ty
            .fetch_result()
            .ok_or_else(|| ConstructionError::MissingResultCapability {
                ty: awaiter_ty.clone(),
            })?;

        Ok(Self {
            value: Box::new(value),
            awaiter_ty,
            result_ty,
        })
    }

    pub fn value(&self) -> &Expr {
        &self.value
    }

    pub fn awaiter_ty(&self) -> &Ty {
        &self.awaiter_ty
    }

    pub fn result_ty(&self) -> &Ty {
        &self.result_ty
    }

    /// Emit the suspension prologue for an already-lowered operand.
    ///
    /// Order: entry label, awaiter assignment, guard-exit marks for every
    /// enclosing region (innermost first), the state transition, the return to
    /// the caller, and finally the landing label. The returned value is what
    /// subsequent statements observe once execution lands again.
    pub(crate) fn lower_at(
        &self,
        operand: Value,
        state: StateId,
        landing: Label,
        return_label: Label,
        cx: &mut Lowering,
    ) -> Result<Value, LoweringError> {
        let entry = cx.fresh_label();
        let holder = Machine::awaiter_holder(state);
        cx.declare(&holder);

        cx.place(entry);
        cx.emit(Instr::Assign {
            local: holder.clone(),
            value: Value::ObtainAwaiter {
                value: Box::new(operand),
            },
        });
        cx.emit_guard_exits();
        TransitionNode::suspend(state, holder.clone(), landing).emit_into(cx)?;
        cx.emit(Instr::Jump {
            target: return_label,
        });
        cx.place(landing);
        cx.record_landing(state, landing);

        Ok(Value::FetchResult {
            awaiter: Box::new(Value::local(holder)),
            state: Some(state),
        })
    }
}

impl Reduce for SuspensionNode {
    type Sync = Value;
    type Resumable = Value;

    /// Obtain the awaiter and fetch its result immediately
    fn reduce_sync(&self, cx: &mut SyncReduction) -> Value {
        Value::FetchResult {
            awaiter: Box::new(Value::ObtainAwaiter {
                value: Box::new(cx.expr(&self.value)),
            }),
            state: None,
        }
    }

    fn reduce_resumable(&self, cx: &mut Lowering) -> Result<Value, LoweringError> {
        // Operands run before the suspension they feed, so nested awaits are
        // numbered first.
        let operand = cx.lower_expr(&self.value)?;
        let state = cx.next_state();
        let landing = cx.fresh_label();
        let return_label = cx.return_label();
        self.lower_at(operand, state, landing, return_label, cx)
    }
}

impl TryFrom<SuspensionRepr> for SuspensionNode {
    type Error = ConstructionError;

    fn try_from(repr: SuspensionRepr) -> Result<Self, Self::Error> {
        SuspensionNode::new(*repr.value)
    }
}

impl From<SuspensionNode> for SuspensionRepr {
    fn from(node: SuspensionNode) -> Self {
        SuspensionRepr { value: node.value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_awaiter_capability() {
        let err = SuspensionNode::new(Expr::num(1.0)).unwrap_err();
        assert_eq!(err, ConstructionError::MissingAwaiterCapability { ty: Ty::Num });
    }

    #[test]
    fn test_missing_result_capability() {
        let awaiter: Ty = Ty::custom("Ticket").into();
        let handle: Ty = Ty::custom("Handle").with_awaiter(awaiter.clone()).into();
        let err = SuspensionNode::new(Expr::local("h", handle)).unwrap_err();
        assert_eq!(err, ConstructionError::MissingResultCapability { ty: awaiter });
    }

    #[test]
    fn test_result_type_resolved_at_construction() {
        let node = SuspensionNode::new(Expr::call("op", vec![], Ty::task(Ty::Str))).unwrap();
        assert_eq!(node.result_ty(), &Ty::Str);
        assert_eq!(
            node.awaiter_ty(),
            &Ty::Awaiter {
                output: Box::new(Ty::Str)
            }
        );
    }

    #[test]
    fn test_deserialize_checks_capabilities() {
        let err = serde_json::from_str::<SuspensionNode>(
            r#"{ "value": { "t": "LitNum", "v": 1.0 } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("obtain-awaiter"));
    }
}
