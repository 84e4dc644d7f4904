//! Synchronous evaluator
//!
//! Tree-walking evaluation of a synchronous reduction. Awaits fetch their result
//! directly, so every awaited task must already be complete; a running one faults
//! with `TaskPending`.

use super::eval::{eval, Env};
use super::host::Host;
use crate::error::Fault;
use crate::lowering::lir::{SyncStmt, Value};
use crate::types::Val;
use std::collections::BTreeMap;

enum Flow {
    Normal,
    Return(Val),
}

/// Evaluate `stmt` to its returned value, or `Null` if it falls off the end
pub fn evaluate_sync(stmt: &SyncStmt, host: &dyn Host) -> Result<Val, Fault> {
    let mut locals = BTreeMap::new();
    match exec(stmt, &mut locals, host)? {
        Flow::Return(value) => Ok(value),
        Flow::Normal => Ok(Val::Null),
    }
}

fn value(value: &Value, locals: &BTreeMap<String, Val>, host: &dyn Host) -> Result<Val, Fault> {
    eval(
        value,
        &mut Env {
            locals,
            host,
            phases: None,
        },
    )
}

fn exec(stmt: &SyncStmt, locals: &mut BTreeMap<String, Val>, host: &dyn Host) -> Result<Flow, Fault> {
    match stmt {
        SyncStmt::Nop => Ok(Flow::Normal),

        SyncStmt::Block { body } => {
            for child in body {
                if let Flow::Return(val) = exec(child, locals, host)? {
                    return Ok(Flow::Return(val));
                }
            }
            Ok(Flow::Normal)
        }

        SyncStmt::Assign { local, value: v } => {
            let val = value(v, locals, host)?;
            locals.insert(local.clone(), val);
            Ok(Flow::Normal)
        }

        SyncStmt::Eval { value: v } => {
            value(v, locals, host)?;
            Ok(Flow::Normal)
        }

        SyncStmt::If {
            test,
            then_s,
            else_s,
        } => {
            if value(test, locals, host)?.is_truthy() {
                exec(then_s, locals, host)
            } else if let Some(else_s) = else_s {
                exec(else_s, locals, host)
            } else {
                Ok(Flow::Normal)
            }
        }

        SyncStmt::While { test, body } => {
            while value(test, locals, host)?.is_truthy() {
                if let Flow::Return(val) = exec(body, locals, host)? {
                    return Ok(Flow::Return(val));
                }
            }
            Ok(Flow::Normal)
        }

        SyncStmt::Return { value: v } => Ok(Flow::Return(value(v, locals, host)?)),

        SyncStmt::TryFinally { body, finally } => {
            let result = exec(body, locals, host);
            match exec(finally, locals, host)? {
                Flow::Normal => result,
                // A return from the finally block replaces the body's outcome
                returned => Ok(returned),
            }
        }

        SyncStmt::Release { holder } => {
            match locals.insert(holder.clone(), Val::Null) {
                Some(Val::Resource(resource)) => host.release(resource)?,
                Some(Val::Null) | None => {}
                Some(other) => return Err(Fault::mismatch("resource", other.kind())),
            }
            Ok(Flow::Normal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{Behavior, SimHost};
    use crate::lowering::reduce_sync;
    use crate::nodes::ScopedResourceNode;
    use crate::types::{Expr, Node, Ty};

    #[test]
    fn test_release_runs_on_fault() {
        let host = SimHost::new().with("open", Behavior::Resource).with(
            "broken",
            Behavior::Fail {
                message: "boom".into(),
            },
        );
        let tree: Node = ScopedResourceNode::new(
            Expr::call("open", vec![], Ty::Resource),
            Node::expr(Expr::call("broken", vec![], Ty::Num)),
        )
        .unwrap()
        .into();

        let result = evaluate_sync(&reduce_sync(&tree), &host);
        assert_eq!(result, Err(Fault::host("boom")));

        let resources = host.resources();
        assert_eq!(resources.len(), 1);
        assert!(resources.values().all(|r| r.releases == 1));
    }

    #[test]
    fn test_completed_await_yields_result() {
        let host = SimHost::new().with("op", Behavior::ready_task(Val::Num(2.0)));
        let tree = Node::ret(Expr::add(
            Expr::num(1.0),
            Expr::awaiting(Expr::call("op", vec![], Ty::task(Ty::Num))).unwrap(),
        ));

        assert_eq!(evaluate_sync(&reduce_sync(&tree), &host), Ok(Val::Num(3.0)));
    }

    #[test]
    fn test_running_await_is_pending() {
        let host = SimHost::new().with("op", Behavior::manual_task());
        let tree = Node::ret(Expr::awaiting(Expr::call("op", vec![], Ty::task(Ty::Num))).unwrap());

        assert!(matches!(
            evaluate_sync(&reduce_sync(&tree), &host),
            Err(Fault::TaskPending { .. })
        ));
    }
}
