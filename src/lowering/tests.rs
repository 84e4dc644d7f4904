//! Tests for the lowering pass

use super::lir::{Instr, SyncStmt, Value};
use super::{lower, lower_with, reduce_sync};
use crate::error::LoweringError;
use crate::nodes::{PlaceholderRegistry, ScopedResourceNode, TransitionNode};
use crate::types::{Expr, Label, Node, RegionId, StateId, Ty, Val};

fn op(name: &str) -> Expr {
    Expr::awaiting(Expr::call(name, vec![], Ty::task(Ty::Num))).unwrap()
}

fn using(resource: &str, body: Vec<Node>) -> Node {
    ScopedResourceNode::new(Expr::call(resource, vec![], Ty::Resource), Node::block(body))
        .unwrap()
        .into()
}

fn marks_before_transition(instrs: &[Instr], state: StateId) -> Vec<RegionId> {
    let at = instrs
        .iter()
        .position(|i| matches!(i, Instr::Transition { state: s, .. } if *s == state))
        .unwrap();
    let start = instrs[..at]
        .iter()
        .rposition(|i| !matches!(i, Instr::MarkGuardExited { .. }))
        .map_or(0, |last| last + 1);
    instrs[start..at]
        .iter()
        .filter_map(|i| match i {
            Instr::MarkGuardExited { region } => Some(*region),
            _ => None,
        })
        .collect()
}

#[test]
fn test_scenario_layout() {
    // x := computeSync(); y := await slowOp(); return x + y
    let tree = Node::block(vec![
        Node::let_("x", Expr::call("computeSync", vec![], Ty::Num)),
        Node::let_("y", op("slowOp")),
        Node::ret(Expr::add(
            Expr::local("x", Ty::Num),
            Expr::local("y", Ty::Num),
        )),
    ]);

    let machine = lower(&tree).unwrap();
    let s0 = StateId(0);
    let landing = machine.landing(s0).unwrap();

    assert_eq!(
        machine.instrs,
        vec![
            Instr::Assign {
                local: "x".into(),
                value: Value::Call {
                    function: "computeSync".into(),
                    args: vec![]
                },
            },
            Instr::Label { label: Label(2) },
            Instr::Assign {
                local: "$awaiter0".into(),
                value: Value::ObtainAwaiter {
                    value: Box::new(Value::Call {
                        function: "slowOp".into(),
                        args: vec![]
                    })
                },
            },
            Instr::Transition {
                state: s0,
                awaiter: "$awaiter0".into(),
                landing,
            },
            Instr::Jump {
                target: machine.return_label
            },
            Instr::Label { label: landing },
            Instr::Assign {
                local: "y".into(),
                value: Value::FetchResult {
                    awaiter: Box::new(Value::local("$awaiter0")),
                    state: Some(s0),
                },
            },
            Instr::Return {
                value: Value::Binary {
                    op: crate::types::BinOp::Add,
                    lhs: Box::new(Value::local("x")),
                    rhs: Box::new(Value::local("y")),
                }
            },
            Instr::Return {
                value: Value::null()
            },
            Instr::Label {
                label: machine.return_label
            },
            Instr::ReturnToCaller,
        ]
    );
    assert_eq!(machine.locals, vec!["$awaiter0", "x", "y"]);
}

#[test]
fn test_state_ids_strictly_increase() {
    let tree = Node::block(vec![
        Node::let_("a", op("first")),
        Node::if_(
            Expr::local("a", Ty::Bool),
            Node::expr(op("second")),
            Some(Node::block(vec![Node::expr(op("third")), Node::expr(op("fourth"))])),
        ),
        using("open", vec![Node::let_("b", op("fifth"))]),
        Node::while_(Expr::bool(false), Node::expr(op("sixth"))),
        Node::ret(Expr::add(op("seventh"), op("eighth"))),
    ]);

    let machine = lower(&tree).unwrap();
    let states: Vec<StateId> = machine.states().collect();

    assert_eq!(states.len(), tree.suspension_count());
    assert_eq!(machine.state_count(), tree.suspension_count());
    assert!(states.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(states, (0..8).map(StateId).collect::<Vec<_>>());
}

#[test]
fn test_nested_await_numbers_operand_first() {
    let inner = Expr::call("inner", vec![], Ty::task(Ty::task(Ty::Num)));
    let outer = Expr::awaiting(Expr::awaiting(inner).unwrap()).unwrap();
    let machine = lower(&Node::ret(outer)).unwrap();

    // The outer awaiter is obtained from the inner result
    let outer_assign = machine
        .instrs
        .iter()
        .find(|i| matches!(i, Instr::Assign { local, .. } if local == "$awaiter1"))
        .unwrap();
    assert_eq!(
        outer_assign,
        &Instr::Assign {
            local: "$awaiter1".into(),
            value: Value::ObtainAwaiter {
                value: Box::new(Value::FetchResult {
                    awaiter: Box::new(Value::local("$awaiter0")),
                    state: Some(StateId(0)),
                })
            },
        }
    );
}

#[test]
fn test_guard_marks_innermost_first_before_yield() {
    let tree = using("outer", vec![using("inner", vec![Node::expr(op("op"))])]);
    let machine = lower(&tree).unwrap();

    assert_eq!(
        marks_before_transition(&machine.instrs, StateId(0)),
        vec![RegionId(1), RegionId(0)]
    );
    assert_eq!(
        machine.regions_enclosing(StateId(0)),
        vec![RegionId(1), RegionId(0)]
    );
}

#[test]
fn test_no_marks_outside_regions() {
    let tree = Node::block(vec![
        using("open", vec![Node::expr(Expr::num(1.0))]),
        Node::expr(op("op")),
    ]);
    let machine = lower(&tree).unwrap();

    assert!(marks_before_transition(&machine.instrs, StateId(0)).is_empty());
    assert!(machine.regions_enclosing(StateId(0)).is_empty());
}

#[test]
fn test_region_records_state_span() {
    let tree = Node::block(vec![
        Node::expr(op("before")),
        using("open", vec![Node::expr(op("a")), Node::expr(op("b"))]),
        Node::expr(op("after")),
    ]);
    let machine = lower(&tree).unwrap();

    let region = &machine.regions[0];
    assert_eq!((region.first_state, region.end_state), (1, 3));
    assert!(!region.encloses(StateId(0)));
    assert!(region.encloses(StateId(2)));
    assert!(!region.encloses(StateId(3)));
}

#[test]
fn test_scoped_layout() {
    let tree = using("open", vec![Node::expr(Expr::num(1.0))]);
    let machine = lower(&tree).unwrap();
    let finally = machine.regions[0].finally;

    assert_eq!(
        &machine.instrs[..7],
        &[
            Instr::Assign {
                local: "$resource0".into(),
                value: Value::Call {
                    function: "open".into(),
                    args: vec![]
                },
            },
            Instr::EnterGuard {
                region: RegionId(0),
                finally
            },
            Instr::Eval {
                value: Value::Lit { v: Val::Num(1.0) }
            },
            Instr::LeaveGuard {
                region: RegionId(0)
            },
            Instr::Label { label: finally },
            Instr::Release {
                holder: "$resource0".into()
            },
            Instr::EndFinally,
        ]
    );
}

#[test]
fn test_existing_binding_is_reused() {
    let tree = Node::block(vec![
        Node::let_("conn", Expr::call("connect", vec![], Ty::Resource)),
        ScopedResourceNode::new(Expr::local("conn", Ty::Resource), Node::block(vec![]))
            .unwrap()
            .into(),
    ]);
    let machine = lower(&tree).unwrap();

    assert!(machine
        .instrs
        .contains(&Instr::Release {
            holder: "conn".into()
        }));
    assert!(!machine.locals.iter().any(|l| l.starts_with("$resource")));
}

#[test]
fn test_deferred_guard_exit_is_patched() {
    let mut registry = PlaceholderRegistry::new();
    let placeholder = registry.allocate().unwrap();

    let tree = Node::block(vec![
        using("first", vec![]),
        TransitionNode::guard_exit_deferred(placeholder).into(),
        ScopedResourceNode::new(
            Expr::call("second", vec![], Ty::Resource),
            Node::block(vec![]),
        )
        .unwrap()
        .binds(placeholder)
        .into(),
    ]);

    let machine = lower_with(&tree, registry).unwrap();
    assert!(machine.instrs.contains(&Instr::MarkGuardExited {
        region: RegionId(1)
    }));
    assert!(!machine.instrs.contains(&Instr::MarkGuardExited {
        region: RegionId(u32::MAX)
    }));
}

#[test]
fn test_unresolved_placeholder_fails_finalization() {
    let mut registry = PlaceholderRegistry::new();
    let placeholder = registry.allocate().unwrap();
    let tree: Node = TransitionNode::guard_exit_deferred(placeholder).into();

    assert_eq!(
        lower_with(&tree, registry).unwrap_err(),
        LoweringError::UnresolvedPlaceholder(placeholder.id)
    );
}

#[test]
fn test_placeholder_from_other_registry() {
    let mut other = PlaceholderRegistry::new();
    let placeholder = other.allocate().unwrap();
    let tree: Node = TransitionNode::guard_exit_deferred(placeholder).into();

    assert_eq!(
        lower(&tree).unwrap_err(),
        LoweringError::UnknownPlaceholder(placeholder.id)
    );
}

#[test]
fn test_lowering_is_deterministic() {
    let build = || {
        Node::block(vec![
            Node::let_("a", op("first")),
            using("open", vec![Node::let_("b", op("second"))]),
            Node::ret(Expr::add(Expr::local("a", Ty::Num), op("third"))),
        ])
    };

    let first = lower(&build()).unwrap();
    let second = lower(&build()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.fingerprint(), second.fingerprint());

    let other = lower(&Node::ret(op("first"))).unwrap();
    assert_ne!(first.fingerprint(), other.fingerprint());
}

#[test]
fn test_operand_spilled_before_await() {
    let tree = Node::ret(Expr::add(
        Expr::call("compute", vec![], Ty::Num),
        op("slowOp"),
    ));
    let machine = lower(&tree).unwrap();

    assert_eq!(
        machine.instrs[0],
        Instr::Assign {
            local: "$t0".into(),
            value: Value::Call {
                function: "compute".into(),
                args: vec![]
            },
        }
    );
}

#[test]
fn test_literal_operand_not_spilled() {
    let tree = Node::ret(Expr::add(Expr::num(1.0), op("slowOp")));
    let machine = lower(&tree).unwrap();
    assert!(!machine.locals.iter().any(|l| l.starts_with("$t")));
}

#[test]
fn test_sync_reduction_of_await_and_scope() {
    let tree = using("open", vec![Node::ret(op("op"))]);

    assert_eq!(
        reduce_sync(&tree),
        SyncStmt::Block {
            body: vec![
                SyncStmt::Assign {
                    local: "$resource0".into(),
                    value: Value::Call {
                        function: "open".into(),
                        args: vec![]
                    },
                },
                SyncStmt::TryFinally {
                    body: Box::new(SyncStmt::Block {
                        body: vec![SyncStmt::Return {
                            value: Value::FetchResult {
                                awaiter: Box::new(Value::ObtainAwaiter {
                                    value: Box::new(Value::Call {
                                        function: "op".into(),
                                        args: vec![]
                                    })
                                }),
                                state: None,
                            }
                        }]
                    }),
                    finally: Box::new(SyncStmt::Release {
                        holder: "$resource0".into()
                    }),
                },
            ]
        }
    );
}

#[test]
fn test_guard_exit_sync_is_noop() {
    let tree: Node = TransitionNode::guard_exit(RegionId(0)).into();
    assert_eq!(reduce_sync(&tree), SyncStmt::Nop);
}

#[test]
fn test_listing_names_jump_table() {
    let machine = lower(&Node::let_("y", op("slowOp"))).unwrap();
    let listing = machine.to_string();

    assert!(listing.contains("transition s0 [$awaiter0] -> L1"));
    assert!(listing.contains("; s0 -> L1"));
    assert!(listing.contains("return_to_caller"));
}
