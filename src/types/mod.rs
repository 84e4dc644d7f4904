//! Type definitions shared by the compiler and the driver
//!
//! - Identities (StateId, Label, RegionId, PlaceholderId)
//! - Static types with capability tables (Ty)
//! - Composed tree nodes (Node, Expr)
//! - Runtime values (Val)

pub mod ast;
pub mod ids;
pub mod ty;
pub mod values;

pub use ast::{BinOp, Expr, Node};
pub use ids::{Label, PlaceholderId, RegionId, ResourceId, StateId, TaskId};
pub use ty::{CustomTy, Ty};
pub use values::Val;
