//! Test helpers for driver tests
//!
//! Common utilities for composing trees and building drivers

use crate::driver::{Driver, SimHost, StepOutcome};
use crate::lowering::lower;
use crate::nodes::ScopedResourceNode;
use crate::types::{Expr, Node, StateId, Ty};
use std::sync::Arc;

/// `await name()` where `name` returns a task of a number
pub fn op(name: &str) -> Expr {
    Expr::awaiting(Expr::call(name, vec![], Ty::task(Ty::Num))).unwrap()
}

/// `using (resource()) { body }`
pub fn using(resource: &str, body: Vec<Node>) -> Node {
    ScopedResourceNode::new(Expr::call(resource, vec![], Ty::Resource), Node::block(body))
        .unwrap()
        .into()
}

/// `x := computeSync(); y := await slowOp(); return x + y`
pub fn scenario() -> Node {
    Node::block(vec![
        Node::let_("x", Expr::call("computeSync", vec![], Ty::Num)),
        Node::let_("y", op("slowOp")),
        Node::ret(Expr::add(
            Expr::local("x", Ty::Num),
            Expr::local("y", Ty::Num),
        )),
    ])
}

/// Serialize/deserialize the tree (to test round-trip compatibility), lower it
/// and build a driver against `host`
pub fn build(tree: &Node, host: &SimHost) -> Driver {
    let json = serde_json::to_string(tree).expect("Tree serialization failed");
    let tree: Node = serde_json::from_str(&json).expect("Tree deserialization failed");
    let machine = lower(&tree).expect("Lowering failed");
    Driver::new(Arc::new(machine), Arc::new(host.clone()))
}

pub fn expect_suspended(outcome: StepOutcome) -> StateId {
    match outcome {
        StepOutcome::Suspended { state } => state,
        other => panic!("expected suspension, got {:?}", other),
    }
}

/// Release count of every resource the host handed out, in acquisition order
pub fn release_counts(host: &SimHost) -> Vec<u32> {
    host.resources().values().map(|r| r.releases).collect()
}
