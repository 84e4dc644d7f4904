//! Scoped resource block (`using`)

use super::placeholder::PlaceholderNode;
use super::Reduce;
use crate::error::{ConstructionError, LoweringError};
use crate::lowering::lir::{SyncStmt, Value};
use crate::lowering::{scope, Lowering, SyncReduction};
use crate::types::{Expr, Node, Ty};
use serde::{Deserialize, Serialize};

/// Where the released resource lives
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// The resource expression is a local; that local is reused as the holder
    Existing { name: String },
    /// The resource is evaluated into a fresh holder introduced by the block
    Fresh { resource: Expr },
}

/// Body guarded by a resource that is released exactly once on every exit path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScopedRepr", into = "ScopedRepr")]
pub struct ScopedResourceNode {
    binding: Binding,
    resource_ty: Ty,
    body: Box<Node>,
    placeholder: Option<PlaceholderNode>,
}

#[derive(Serialize, Deserialize)]
struct ScopedRepr {
    resource: Expr,
    body: Box<Node>,
    #[serde(default)]
    placeholder: Option<PlaceholderNode>,
}

impl ScopedResourceNode {
    pub fn new(resource: Expr, body: Node) -> Result<Self, ConstructionError> {
        let resource_ty = resource.ty();
        if !resource_ty.has_release() {
            return Err(ConstructionError::MissingReleaseCapability { ty: resource_ty });
        }

        let binding = match resource {
            Expr::Local { name, .. } => Binding::Existing { name },
            resource => Binding::Fresh { resource },
        };

        Ok(Self {
            binding,
            resource_ty,
            body: Box::new(body),
            placeholder: None,
        })
    }

    /// Resolve `placeholder` to this block's region when it is lowered
    pub fn binds(mut self, placeholder: PlaceholderNode) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Resource expression evaluated by the block, if it introduces a fresh holder
    pub fn resource(&self) -> Option<&Expr> {
        match &self.binding {
            Binding::Fresh { resource } => Some(resource),
            Binding::Existing { .. } => None,
        }
    }

    pub fn body(&self) -> &Node {
        &self.body
    }

    pub fn placeholder(&self) -> Option<PlaceholderNode> {
        self.placeholder
    }
}

impl Reduce for ScopedResourceNode {
    type Sync = SyncStmt;
    type Resumable = ();

    /// `holder := resource; try { body } finally { release holder }`
    fn reduce_sync(&self, cx: &mut SyncReduction) -> SyncStmt {
        let mut prologue = Vec::new();
        let holder = match &self.binding {
            Binding::Existing { name } => name.clone(),
            Binding::Fresh { resource } => {
                let value: Value = cx.expr(resource);
                let holder = cx.resource_holder();
                prologue.push(SyncStmt::Assign {
                    local: holder.clone(),
                    value,
                });
                holder
            }
        };

        cx.enter_scope();
        let body = cx.node(&self.body);
        cx.exit_scope();

        prologue.push(SyncStmt::TryFinally {
            body: Box::new(body),
            finally: Box::new(SyncStmt::Release { holder }),
        });
        SyncStmt::Block { body: prologue }
    }

    fn reduce_resumable(&self, cx: &mut Lowering) -> Result<(), LoweringError> {
        scope::build(self, cx)
    }
}

impl TryFrom<ScopedRepr> for ScopedResourceNode {
    type Error = ConstructionError;

    fn try_from(repr: ScopedRepr) -> Result<Self, Self::Error> {
        let node = ScopedResourceNode::new(repr.resource, *repr.body)?;
        Ok(match repr.placeholder {
            Some(placeholder) => node.binds(placeholder),
            None => node,
        })
    }
}

impl From<ScopedResourceNode> for ScopedRepr {
    fn from(node: ScopedResourceNode) -> Self {
        let resource = match node.binding {
            Binding::Existing { name } => Expr::Local {
                name,
                ty: node.resource_ty,
            },
            Binding::Fresh { resource } => resource,
        };
        ScopedRepr {
            resource,
            body: node.body,
            placeholder: node.placeholder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_release_capability() {
        let err = ScopedResourceNode::new(Expr::str("file"), Node::block(vec![])).unwrap_err();
        assert_eq!(err, ConstructionError::MissingReleaseCapability { ty: Ty::Str });
    }

    #[test]
    fn test_local_resource_reuses_binding() {
        let node =
            ScopedResourceNode::new(Expr::local("conn", Ty::Resource), Node::block(vec![]))
                .unwrap();
        assert_eq!(
            node.binding(),
            &Binding::Existing {
                name: "conn".to_string()
            }
        );
        assert!(node.resource().is_none());
    }

    #[test]
    fn test_fresh_binding_for_call() {
        let open = Expr::call("open", vec![], Ty::Resource);
        let node = ScopedResourceNode::new(open.clone(), Node::block(vec![])).unwrap();
        assert_eq!(node.resource(), Some(&open));
    }

    #[test]
    fn test_serde_keeps_existing_binding() {
        let node =
            ScopedResourceNode::new(Expr::local("conn", Ty::Resource), Node::block(vec![]))
                .unwrap();
        let json = serde_json::to_string(&node).unwrap();
        let back: ScopedResourceNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
