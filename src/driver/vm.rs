//! Driver state
//!
//! The driver holds everything needed to execute (and persist/resume) one
//! instance of a lowered machine:
//! - frame: program counter, hoisted locals, guard frames, pending unwind
//! - shared: the atomic state field and inbox that signals arrive through
//!
//! Stepping takes `&mut self`, so a driver has a single logical owner. Other
//! contexts only ever hold [`Notifier`] handles.

use super::atomic::{MachineState, Phase};
use super::host::Host;
use super::phase::SuspensionPhase;
use super::signal::{Notifier, Shared, Signal, SignalKind};
use crate::config::DriverConfig;
use crate::error::{Fault, SnapshotError};
use crate::lowering::lir::Machine;
use crate::types::{Label, RegionId, StateId, Val};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info_span, Span};
use uuid::Uuid;

/* ===================== Frame ===================== */

/// Active guarded region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardFrame {
    pub region: RegionId,
    pub finally: Label,
    /// Marked exited ahead of a yield; owes its release if the driver is torn down
    pub exited: bool,
}

/// Unwind in progress, carried through finally blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Pending {
    Return { value: Val },
    Fault { fault: Fault },
}

/// Serializable execution state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub pc: usize,
    pub locals: BTreeMap<String, Val>,
    /// Innermost last
    pub guards: Vec<GuardFrame>,
    pub pending: Option<Pending>,
    pub phases: BTreeMap<StateId, SuspensionPhase>,
    /// Bumped on every suspension; identifies the current one
    #[serde(default)]
    pub epoch: u32,
}

/* ===================== Step Result ===================== */

/// Result of one `step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum StepOutcome {
    Completed { value: Val },
    Suspended { state: StateId },
    Faulted { fault: Fault },
}

impl StepOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepOutcome::Suspended { .. })
    }
}

/// Persisted driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Fingerprint of the machine the driver was running
    pub fingerprint: String,
    pub suspended_at: Option<StateId>,
    pub frame: Frame,
    pub outcome: Option<StepOutcome>,
}

/* ===================== Driver ===================== */

pub struct Driver {
    pub(crate) id: Uuid,
    pub(crate) machine: Arc<Machine>,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) frame: Frame,
    pub(crate) shared: Arc<Shared>,
    pub(crate) inbox: UnboundedReceiver<Signal>,
    /// Signal received by `run` and not yet consumed by `step`
    pub(crate) parked: Option<Signal>,
    pub(crate) settings: DriverConfig,
    pub(crate) outcome: Option<StepOutcome>,
    pub(crate) span: Span,
}

impl Driver {
    pub fn new(machine: Arc<Machine>, host: Arc<dyn Host>) -> Self {
        Self::with_config(machine, host, DriverConfig::default())
    }

    pub fn with_config(machine: Arc<Machine>, host: Arc<dyn Host>, settings: DriverConfig) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let span = info_span!("driver", %id);
        span.in_scope(|| {
            debug!(
                states = machine.state_count(),
                instructions = machine.instrs.len(),
                "driver created"
            )
        });

        Self {
            id,
            machine,
            host,
            frame: Frame::default(),
            shared: Arc::new(Shared::new(sender)),
            inbox,
            parked: None,
            settings,
            outcome: None,
            span,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn local(&self, name: &str) -> Option<&Val> {
        self.frame.locals.get(name)
    }

    pub fn phase_of(&self, state: StateId) -> Option<SuspensionPhase> {
        self.frame.phases.get(&state).copied()
    }

    /// Current value of the shared state field
    pub fn status(&self) -> MachineState {
        self.shared.state.load()
    }

    /// Handle that delivers signals for the current suspension at `state`
    pub fn notifier(&self, state: StateId) -> Notifier {
        Notifier::new(Arc::clone(&self.shared), state, self.frame.epoch)
    }

    /// Deliver a completion for `state`. Stale and duplicate deliveries return false.
    ///
    /// An admitted completion whose task has not settled yet is dropped by the next
    /// `step`, which stays suspended.
    pub fn deliver_completion(&self, state: StateId) -> bool {
        self.notifier(state).complete()
    }

    /// Cancel the suspension at `state`. The next `step` releases every owed
    /// resource and reports `Faulted(Cancelled)`.
    pub fn cancel(&self, state: StateId) -> bool {
        self.notifier(state).cancel()
    }

    /// Mark the active guard frames from the innermost down to `region` as exited
    pub fn mark_guard_exited(&mut self, region: RegionId) {
        match self.frame.guards.iter().rposition(|g| g.region == region) {
            Some(at) => {
                for guard in &mut self.frame.guards[at..] {
                    guard.exited = true;
                }
            }
            None => debug!(%region, "guard exit for inactive region"),
        }
    }

    /// Regions whose resources are owed if the driver is torn down now, innermost first
    pub fn owed_cleanup(&self) -> Vec<RegionId> {
        self.frame
            .guards
            .iter()
            .rev()
            .filter(|g| g.exited)
            .map(|g| g.region)
            .collect()
    }

    /// Step until the machine completes or faults, waiting for signals in between
    pub async fn run(&mut self) -> StepOutcome {
        loop {
            match self.step() {
                StepOutcome::Suspended { state } => match self.inbox.recv().await {
                    Some(signal) => self.parked = Some(signal),
                    None => {
                        // The driver holds a sender through `shared`
                        return StepOutcome::Faulted {
                            fault: Fault::internal(format!("inbox closed while suspended at {}", state)),
                        };
                    }
                },
                done => return done,
            }
        }
    }

    /* ===================== Persistence ===================== */

    pub fn snapshot(&self) -> Snapshot {
        let status = self.status();
        let suspended_at = matches!(status.phase, Phase::Suspended | Phase::Signaled)
            .then_some(status.state);

        Snapshot {
            fingerprint: self.machine.fingerprint(),
            suspended_at,
            frame: self.frame.clone(),
            outcome: self.outcome.clone(),
        }
    }

    /// Rebuild a driver from a snapshot of the same machine
    ///
    /// A driver that was suspended resubscribes to its awaiter, so a completion
    /// admitted but not consumed before the snapshot is delivered again. A pending
    /// cancellation has to be reissued.
    pub fn restore(
        machine: Arc<Machine>,
        host: Arc<dyn Host>,
        snapshot: Snapshot,
        settings: DriverConfig,
    ) -> Result<Self, SnapshotError> {
        let expected = machine.fingerprint();
        if snapshot.fingerprint != expected {
            return Err(SnapshotError::FingerprintMismatch {
                expected,
                found: snapshot.fingerprint,
            });
        }
        if let Some(state) = snapshot.suspended_at {
            if machine.landing(state).is_none() {
                return Err(SnapshotError::UnknownState(state));
            }
        }

        let mut driver = Self::with_config(machine, host, settings);
        driver.frame = snapshot.frame;
        driver.outcome = snapshot.outcome;

        match (&driver.outcome, snapshot.suspended_at) {
            (Some(StepOutcome::Completed { .. }), _) => {
                driver.shared.state.store(MachineState::at(Phase::Completed, StateId(0)))
            }
            (Some(StepOutcome::Faulted { .. }), _) => {
                driver.shared.state.store(MachineState::at(Phase::Faulted, StateId(0)))
            }
            (_, Some(state)) => {
                driver
                    .shared
                    .state
                    .store(MachineState::suspended(state, driver.frame.epoch));
                let holder = Machine::awaiter_holder(state);
                match driver.frame.locals.get(&holder) {
                    Some(Val::Awaiter(task)) => driver.host.subscribe(*task, driver.notifier(state)),
                    _ => debug!(%state, "restored without an awaiter to resubscribe"),
                }
            }
            _ => {}
        }

        driver
            .span
            .in_scope(|| debug!(suspended_at = ?snapshot.suspended_at, "driver restored"));
        Ok(driver)
    }

    /* ===================== Signals ===================== */

    pub(crate) fn next_signal(&mut self) -> Option<Signal> {
        self.parked.take().or_else(|| self.inbox.try_recv().ok())
    }

    /// Consume the admitted signal for the state the machine is suspended at
    pub(crate) fn take_signal(&mut self) -> Wake {
        let current = self.status();
        match current.phase {
            Phase::Suspended => Wake::Idle(current.state),
            Phase::Signaled => {
                while let Some(signal) = self.next_signal() {
                    if signal.state != current.state || signal.epoch != current.epoch {
                        debug!(
                            state = %signal.state,
                            epoch = signal.epoch,
                            "dropping signal for superseded suspension"
                        );
                        continue;
                    }
                    self.shared.state.store(MachineState::running());
                    return match signal.kind {
                        SignalKind::Completed => Wake::Resume(signal.state),
                        SignalKind::Cancelled => Wake::Cancel(signal.state),
                    };
                }
                // Admitted but not yet in the queue
                Wake::Idle(current.state)
            }
            Phase::Running | Phase::Completed | Phase::Faulted => Wake::Running,
        }
    }
}

/// What the owner does at the start of a step or after a yield
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Running,
    Idle(StateId),
    Resume(StateId),
    Cancel(StateId),
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("frame", &self.frame)
            .field("outcome", &self.outcome)
            .finish()
    }
}
