//! # Driver
//!
//! Executes a lowered [`Machine`](crate::lowering::lir::Machine) one step at a
//! time. A step runs until the machine yields at a suspension point, completes,
//! or faults. Completion and cancellation signals arrive from any context through
//! [`Notifier`] handles and are admitted by a compare-and-set on the driver's
//! single state field, so each suspension resumes at most once.
//!
//! ```text
//!            step()                        signal admitted              step()
//! Running ──────────► Suspended(s, e) ─────────────────► Signaled(s, e) ─────────► Running
//!    │                       ▲                                  │                   │
//!    │                       └──── task still running ──────────┘                   │
//!    └──────────────────────────► Completed / Faulted ◄─────────────────────────────┘
//! ```
//!
//! `e` is the suspension epoch: a loop suspends at the same `s` once per
//! iteration, each time with a new `e`.

pub mod atomic;
pub mod direct;
mod eval;
mod exec_loop;
pub mod host;
pub mod phase;
pub mod signal;
pub mod sim;
pub mod vm;

#[cfg(test)]
mod tests;

pub use atomic::{AtomicState, MachineState, Phase};
pub use direct::evaluate_sync;
pub use host::Host;
pub use phase::SuspensionPhase;
pub use signal::{Notifier, Signal, SignalKind};
pub use sim::{Behavior, ResourceRecord, SimHost};
pub use vm::{Driver, Frame, GuardFrame, Pending, Snapshot, StepOutcome};
