//! Composed tree node types
//!
//! The tree is built once during composition (in Rust or from JSON) and consumed
//! exactly once by the lowering pass.

use super::ty::Ty;
use super::values::Val;
use crate::error::ConstructionError;
use crate::nodes::{ScopedResourceNode, SuspensionNode, TransitionNode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statement node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Node {
    Block {
        body: Vec<Node>,
    },
    Let {
        name: String,
        value: Expr,
    },
    Expr {
        expr: Expr,
    },
    If {
        test: Expr,
        then_n: Box<Node>,
        #[serde(default)]
        else_n: Option<Box<Node>>,
    },
    While {
        test: Expr,
        body: Box<Node>,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    Scoped(ScopedResourceNode),
    Transition(TransitionNode),
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    Null,
    LitBool {
        v: bool,
    },
    LitNum {
        v: f64,
    },
    LitStr {
        v: String,
    },
    Local {
        name: String,
        ty: Ty,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Call of a host function with a declared return type
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Expr>,
        ty: Ty,
    },
    Await(SuspensionNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Gt,
}

/* ===================== Expressions ===================== */

impl Expr {
    pub fn num(v: f64) -> Self {
        Expr::LitNum { v }
    }

    pub fn str(v: impl Into<String>) -> Self {
        Expr::LitStr { v: v.into() }
    }

    pub fn bool(v: bool) -> Self {
        Expr::LitBool { v }
    }

    pub fn local(name: impl Into<String>, ty: Ty) -> Self {
        Expr::Local {
            name: name.into(),
            ty,
        }
    }

    pub fn call(function: impl Into<String>, args: Vec<Expr>, ty: Ty) -> Self {
        Expr::Call {
            function: function.into(),
            args,
            ty,
        }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Add, lhs, rhs)
    }

    /// Wrap `value` in a suspension point, checking its awaiter capabilities
    pub fn awaiting(value: Expr) -> Result<Self, ConstructionError> {
        Ok(Expr::Await(SuspensionNode::new(value)?))
    }

    /// Static type of the expression
    pub fn ty(&self) -> Ty {
        match self {
            Expr::Null => Ty::Unit,
            Expr::LitBool { .. } => Ty::Bool,
            Expr::LitNum { .. } => Ty::Num,
            Expr::LitStr { .. } => Ty::Str,
            Expr::Local { ty, .. } | Expr::Call { ty, .. } => ty.clone(),
            Expr::Binary { op, lhs, .. } => op.result_ty(lhs.ty()),
            Expr::Await(node) => node.result_ty().clone(),
        }
    }

    /// Whether a suspension point occurs anywhere inside this expression
    pub fn contains_await(&self) -> bool {
        match self {
            Expr::Await(_) => true,
            Expr::Binary { lhs, rhs, .. } => lhs.contains_await() || rhs.contains_await(),
            Expr::Call { args, .. } => args.iter().any(Expr::contains_await),
            _ => false,
        }
    }

    /// Literal value, if this expression is a literal
    pub fn as_literal(&self) -> Option<Val> {
        match self {
            Expr::Null => Some(Val::Null),
            Expr::LitBool { v } => Some(Val::Bool(*v)),
            Expr::LitNum { v } => Some(Val::Num(*v)),
            Expr::LitStr { v } => Some(Val::Str(v.clone())),
            _ => None,
        }
    }
}

impl BinOp {
    pub fn result_ty(self, lhs: Ty) -> Ty {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => lhs,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt => Ty::Bool,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/* ===================== Statements ===================== */

impl Node {
    pub fn block(body: Vec<Node>) -> Self {
        Node::Block { body }
    }

    pub fn let_(name: impl Into<String>, value: Expr) -> Self {
        Node::Let {
            name: name.into(),
            value,
        }
    }

    pub fn expr(expr: Expr) -> Self {
        Node::Expr { expr }
    }

    pub fn ret(value: Expr) -> Self {
        Node::Return { value: Some(value) }
    }

    pub fn if_(test: Expr, then_n: Node, else_n: Option<Node>) -> Self {
        Node::If {
            test,
            then_n: Box::new(then_n),
            else_n: else_n.map(Box::new),
        }
    }

    pub fn while_(test: Expr, body: Node) -> Self {
        Node::While {
            test,
            body: Box::new(body),
        }
    }

    /// Number of suspension points in this subtree
    pub fn suspension_count(&self) -> usize {
        match self {
            Node::Block { body } => body.iter().map(Node::suspension_count).sum(),
            Node::Let { value: expr, .. } | Node::Expr { expr } => expr_suspensions(expr),
            Node::If {
                test,
                then_n,
                else_n,
            } => {
                expr_suspensions(test)
                    + then_n.suspension_count()
                    + else_n.as_ref().map_or(0, |n| n.suspension_count())
            }
            Node::While { test, body } => expr_suspensions(test) + body.suspension_count(),
            Node::Return { value } => value.as_ref().map_or(0, expr_suspensions),
            Node::Scoped(scoped) => {
                scoped.resource().map_or(0, expr_suspensions) + scoped.body().suspension_count()
            }
            Node::Transition(_) => 0,
        }
    }
}

fn expr_suspensions(expr: &Expr) -> usize {
    match expr {
        Expr::Await(node) => 1 + expr_suspensions(node.value()),
        Expr::Binary { lhs, rhs, .. } => expr_suspensions(lhs) + expr_suspensions(rhs),
        Expr::Call { args, .. } => args.iter().map(expr_suspensions).sum(),
        _ => 0,
    }
}

impl From<ScopedResourceNode> for Node {
    fn from(node: ScopedResourceNode) -> Self {
        Node::Scoped(node)
    }
}

impl From<TransitionNode> for Node {
    fn from(node: TransitionNode) -> Self {
        Node::Transition(node)
    }
}
