//! # Node Library
//!
//! Immutable node kinds that need more than straightforward expansion when a
//! tree is lowered into a resumable machine:
//!
//! - [`SuspensionNode`]: an await on a value with awaiter capabilities
//! - [`ScopedResourceNode`]: a body whose resource is released exactly once
//! - [`TransitionNode`]: a state transition, including guard exits
//! - [`PlaceholderNode`]: a forward reference resolved while lowering
//!
//! The set is closed. Every kind reduces through [`Reduce`], which exposes a
//! synchronous form (for machines that never suspend) and a resumable form
//! (emitted into a live lowering pass).

pub mod placeholder;
pub mod scoped;
pub mod suspension;
pub mod transition;

use crate::error::LoweringError;
use crate::lowering::{Lowering, SyncReduction};

pub use placeholder::{PlaceholderNode, PlaceholderRegistry};
pub use scoped::{Binding, ScopedResourceNode};
pub use suspension::SuspensionNode;
pub use transition::{Target, TransitionKind, TransitionNode};

/// Reduction interface shared by every node kind
pub trait Reduce {
    type Sync;
    type Resumable;

    /// Direct inline form, used when the enclosing machine never suspends
    fn reduce_sync(&self, cx: &mut SyncReduction) -> Self::Sync;

    /// Form reduced against a lowering pass that targets a live driver
    fn reduce_resumable(&self, cx: &mut Lowering) -> Result<Self::Resumable, LoweringError>;
}
