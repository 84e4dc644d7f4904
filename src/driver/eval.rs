//! Lowered value evaluation
//!
//! Shared by the stepping driver and the synchronous evaluator. Values contain no
//! suspension points, so evaluation always runs to a result or a fault.

use super::host::Host;
use super::phase::SuspensionPhase;
use crate::error::Fault;
use crate::lowering::lir::Value;
use crate::types::{BinOp, StateId, Val};
use std::collections::BTreeMap;

pub(crate) type Phases = BTreeMap<StateId, SuspensionPhase>;

pub(crate) struct Env<'a> {
    pub locals: &'a BTreeMap<String, Val>,
    pub host: &'a dyn Host,
    /// Phase record of the driver; absent for synchronous evaluation
    pub phases: Option<&'a mut Phases>,
}

/// Move `state` to phase `to`, rejecting transitions the phase table forbids
pub(crate) fn advance(
    phases: &mut Phases,
    state: StateId,
    to: SuspensionPhase,
) -> Result<(), Fault> {
    let from = phases
        .get(&state)
        .copied()
        .unwrap_or(SuspensionPhase::Created);
    if !from.can_advance(to) {
        return Err(Fault::internal(format!(
            "illegal phase transition {:?} -> {:?} at {}",
            from, to, state
        )));
    }
    phases.insert(state, to);
    Ok(())
}

pub(crate) fn eval(value: &Value, env: &mut Env<'_>) -> Result<Val, Fault> {
    match value {
        Value::Lit { v } => Ok(v.clone()),

        Value::Local { name } => env
            .locals
            .get(name)
            .cloned()
            .ok_or_else(|| Fault::UndefinedLocal { name: name.clone() }),

        Value::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, env)?;
            let rhs = eval(rhs, env)?;
            binary(*op, lhs, rhs)
        }

        Value::Call { function, args } => {
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval(arg, env)?);
            }
            env.host.call(function, &evaluated)
        }

        Value::ObtainAwaiter { value } => {
            let awaitable = eval(value, env)?;
            env.host.obtain_awaiter(awaitable).map(Val::Awaiter)
        }

        Value::FetchResult { awaiter, state } => {
            let task = match eval(awaiter, env)? {
                Val::Awaiter(task) => task,
                other => return Err(Fault::mismatch("awaiter", other.kind())),
            };
            let result = env
                .host
                .poll_task(task)
                .unwrap_or(Err(Fault::TaskPending { task }));

            if let (Some(state), Some(phases)) = (state, env.phases.as_deref_mut()) {
                let to = match result {
                    Ok(_) => SuspensionPhase::Completed,
                    Err(_) => SuspensionPhase::Faulted,
                };
                advance(phases, *state, to)?;
            }
            result
        }
    }
}

fn binary(op: BinOp, lhs: Val, rhs: Val) -> Result<Val, Fault> {
    match (op, lhs, rhs) {
        (BinOp::Eq, l, r) => Ok(Val::Bool(l == r)),
        (BinOp::Ne, l, r) => Ok(Val::Bool(l != r)),

        (BinOp::Add, Val::Str(l), Val::Str(r)) => Ok(Val::Str(l + &r)),
        (BinOp::Add, Val::Num(l), Val::Num(r)) => Ok(Val::Num(l + r)),
        (BinOp::Sub, Val::Num(l), Val::Num(r)) => Ok(Val::Num(l - r)),
        (BinOp::Mul, Val::Num(l), Val::Num(r)) => Ok(Val::Num(l * r)),
        (BinOp::Div, Val::Num(l), Val::Num(r)) => Ok(Val::Num(l / r)),
        (BinOp::Lt, Val::Num(l), Val::Num(r)) => Ok(Val::Bool(l < r)),
        (BinOp::Gt, Val::Num(l), Val::Num(r)) => Ok(Val::Bool(l > r)),

        (op, l, r) => Err(Fault::mismatch(
            format!("operands for `{}`", op),
            format!("{} and {}", l.kind(), r.kind()),
        )),
    }
}
