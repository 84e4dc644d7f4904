//! Cross-context signal delivery
//!
//! A completion or cancellation may fire on any thread. It is admitted by one
//! compare-and-set on the driver's state field (`Suspended(s, e)` ->
//! `Signaled(s, e)`) and then sent through the driver's inbox. Duplicate signals
//! and signals for a superseded state or an earlier epoch of the same state lose
//! the compare-and-set and are dropped.

use super::atomic::{AtomicState, MachineState, EPOCH_MASK};
use crate::types::StateId;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub state: StateId,
    pub epoch: u32,
    pub kind: SignalKind,
}

/// State shared between a driver and the handles it gives out
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: AtomicState,
    inbox: UnboundedSender<Signal>,
}

impl Shared {
    pub(crate) fn new(inbox: UnboundedSender<Signal>) -> Self {
        Self {
            state: AtomicState::new(MachineState::running()),
            inbox,
        }
    }

    /// Admit `signal` if the machine is suspended at its state
    pub(crate) fn deliver(&self, signal: Signal) -> bool {
        let admitted = self.state.compare_and_set(
            MachineState::suspended(signal.state, signal.epoch),
            MachineState::signaled(signal.state, signal.epoch),
        );
        if !admitted {
            debug!(
                state = %signal.state,
                epoch = signal.epoch,
                kind = ?signal.kind,
                current = ?self.state.load(),
                "discarded signal"
            );
            return false;
        }

        if self.inbox.send(signal).is_err() {
            warn!(state = %signal.state, "driver inbox closed");
        }
        true
    }
}

/// Handle the awaited operation uses to wake a driver suspended at one state
///
/// A notifier is bound to one suspension: once the driver moves past it, even a
/// later suspension at the same state, the notifier's signals are discarded.
#[derive(Clone)]
pub struct Notifier {
    shared: Arc<Shared>,
    state: StateId,
    epoch: u32,
}

impl Notifier {
    pub(crate) fn new(shared: Arc<Shared>, state: StateId, epoch: u32) -> Self {
        Self {
            shared,
            state,
            epoch: epoch & EPOCH_MASK,
        }
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Deliver a completion. Returns whether this call was the one admitted.
    pub fn complete(&self) -> bool {
        self.shared.deliver(Signal {
            state: self.state,
            epoch: self.epoch,
            kind: SignalKind::Completed,
        })
    }

    /// Deliver a cancellation. Returns whether this call was the one admitted.
    pub fn cancel(&self) -> bool {
        self.shared.deliver(Signal {
            state: self.state,
            epoch: self.epoch,
            kind: SignalKind::Cancelled,
        })
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .finish()
    }
}
