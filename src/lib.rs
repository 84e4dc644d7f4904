//! # cadence-core
//!
//! Lowers a composed tree of suspension points, scoped-resource blocks and
//! guard-exit transitions into a resumable state machine, and drives it.
//!
//! - [`types`]: identities, static types with capability tables, the input tree
//! - [`nodes`]: node kinds and their synchronous/resumable reductions
//! - [`lowering`]: the lowering pass producing a [`Machine`]
//! - [`driver`]: the stepping driver, evaluation host interface and simulation host

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod lowering;
pub mod nodes;
pub mod types;

// Re-export main types
pub use driver::{Driver, Host, Notifier, SimHost, StepOutcome};
pub use error::{ConstructionError, Fault, LoweringError, SnapshotError};
pub use lowering::lir::Machine;
pub use lowering::{lower, lower_with, reduce_sync};
pub use types::*;
