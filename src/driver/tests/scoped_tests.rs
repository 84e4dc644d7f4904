//! Tests for scoped resources, guard-exit marks and cancellation cleanup

use super::helpers::{build, expect_suspended, op, release_counts, using};
use crate::driver::{Behavior, SimHost, StepOutcome};
use crate::error::Fault;
use crate::nodes::{ScopedResourceNode, TransitionNode};
use crate::types::{Expr, Node, RegionId, StateId, Ty, Val};

fn host() -> SimHost {
    SimHost::new()
        .with("open", Behavior::Resource)
        .with("outer", Behavior::Resource)
        .with("inner", Behavior::Resource)
        .with("op", Behavior::manual_task())
        .with(
            "broken",
            Behavior::Fail {
                message: "boom".into(),
            },
        )
}

#[test]
fn test_release_once_on_normal_exit() {
    let host = host();
    let mut driver = build(&using("open", vec![Node::expr(Expr::num(1.0))]), &host);

    assert_eq!(driver.step(), StepOutcome::Completed { value: Val::Null });
    assert_eq!(release_counts(&host), vec![1]);
    assert_eq!(driver.local("$resource0"), Some(&Val::Null));
}

#[test]
fn test_release_once_on_fault() {
    let host = host();
    let tree = using(
        "open",
        vec![Node::expr(Expr::call("broken", vec![], Ty::Num))],
    );
    let mut driver = build(&tree, &host);

    assert_eq!(
        driver.step(),
        StepOutcome::Faulted {
            fault: Fault::host("boom")
        }
    );
    assert_eq!(release_counts(&host), vec![1]);
}

#[test]
fn test_release_once_after_resumption() {
    let host = host();
    let mut driver = build(&using("open", vec![Node::expr(op("op"))]), &host);

    expect_suspended(driver.step());
    assert_eq!(release_counts(&host), vec![0]);

    host.complete(host.last_task().unwrap(), Val::Null);
    assert_eq!(driver.step(), StepOutcome::Completed { value: Val::Null });
    assert_eq!(release_counts(&host), vec![1]);
}

#[test]
fn test_return_inside_region_unwinds_through_release() {
    let host = host();
    let tree = Node::block(vec![
        using("outer", vec![using("inner", vec![Node::ret(Expr::num(8.0))])]),
        Node::ret(Expr::num(0.0)),
    ]);
    let mut driver = build(&tree, &host);

    assert_eq!(driver.step(), StepOutcome::Completed { value: Val::Num(8.0) });
    assert_eq!(release_counts(&host), vec![1, 1]);
}

#[test]
fn test_nested_marks_innermost_first() {
    let host = host();
    let tree = using(
        "outer",
        vec![using("inner", vec![Node::expr(op("op"))]), Node::expr(op("op"))],
    );
    let mut driver = build(&tree, &host);

    assert_eq!(expect_suspended(driver.step()), StateId(0));
    assert_eq!(driver.owed_cleanup(), vec![RegionId(1), RegionId(0)]);

    // Resuming clears the marks; the next yield marks only the outer region
    host.complete(host.last_task().unwrap(), Val::Null);
    assert_eq!(expect_suspended(driver.step()), StateId(1));
    assert_eq!(driver.owed_cleanup(), vec![RegionId(0)]);
}

#[test]
fn test_cancel_releases_owed_resources_once() {
    let host = host();
    let tree = using("outer", vec![using("inner", vec![Node::expr(op("op"))])]);
    let mut driver = build(&tree, &host);

    let state = expect_suspended(driver.step());
    assert!(driver.cancel(state));
    assert!(!driver.cancel(state));
    assert!(!driver.deliver_completion(state));

    let outcome = driver.step();
    assert_eq!(
        outcome,
        StepOutcome::Faulted {
            fault: Fault::Cancelled { state }
        }
    );
    assert_eq!(release_counts(&host), vec![1, 1]);

    // The task completing afterwards changes nothing
    host.complete(host.last_task().unwrap(), Val::Null);
    assert_eq!(driver.step(), outcome);
    assert_eq!(release_counts(&host), vec![1, 1]);
}

#[test]
fn test_cancel_outside_regions_releases_nothing() {
    let host = host();
    let tree = Node::block(vec![
        using("open", vec![]),
        Node::expr(op("op")),
    ]);
    let mut driver = build(&tree, &host);

    let state = expect_suspended(driver.step());
    assert_eq!(release_counts(&host), vec![1]);
    assert!(driver.owed_cleanup().is_empty());

    driver.cancel(state);
    assert_eq!(
        driver.step(),
        StepOutcome::Faulted {
            fault: Fault::Cancelled { state }
        }
    );
    assert_eq!(release_counts(&host), vec![1]);
}

#[test]
fn test_existing_binding_released_and_cleared() {
    let host = host();
    let tree = Node::block(vec![
        Node::let_("conn", Expr::call("open", vec![], Ty::Resource)),
        ScopedResourceNode::new(
            Expr::local("conn", Ty::Resource),
            Node::block(vec![Node::expr(op("op"))]),
        )
        .unwrap()
        .into(),
        Node::ret(Expr::local("conn", Ty::Resource)),
    ]);
    let mut driver = build(&tree, &host);

    expect_suspended(driver.step());
    host.complete(host.last_task().unwrap(), Val::Null);

    assert_eq!(driver.step(), StepOutcome::Completed { value: Val::Null });
    assert_eq!(release_counts(&host), vec![1]);
}

#[test]
fn test_explicit_guard_exit_marks_region() {
    let host = host();
    let tree = using(
        "outer",
        vec![using(
            "inner",
            vec![
                TransitionNode::guard_exit(RegionId(0)).into(),
                Node::expr(Expr::call("broken", vec![], Ty::Num)),
            ],
        )],
    );
    let mut driver = build(&tree, &host);

    // Marks are bookkeeping only; normal unwinding still releases both
    assert!(matches!(driver.step(), StepOutcome::Faulted { .. }));
    assert_eq!(release_counts(&host), vec![1, 1]);
}
