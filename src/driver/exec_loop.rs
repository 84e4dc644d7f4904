//! Core execution loop
//!
//! `step()` consumes at most one admitted signal, then executes instructions
//! until the machine yields, completes or faults.
//!
//! ## Unwinding
//! A fault or return pops the innermost guard frame, stores itself as pending and
//! jumps to that frame's finally block. `end_finally` resumes the unwind. With no
//! guard frames left the pending value becomes the outcome.

use super::atomic::{MachineState, Phase, EPOCH_MASK};
use super::eval::{self, advance, Env};
use super::phase::SuspensionPhase;
use super::vm::{Driver, GuardFrame, Pending, StepOutcome, Wake};
use crate::error::Fault;
use crate::lowering::lir::{Instr, Machine, Value};
use crate::types::{Label, RegionId, StateId, Val};
use std::sync::Arc;
use tracing::{debug, trace, warn};

impl Driver {
    /* ===================== Public API ===================== */

    /// Run until the next suspension point or the end of the machine
    ///
    /// Terminal outcomes are sticky: stepping a finished driver returns the same
    /// outcome again.
    pub fn step(&mut self) -> StepOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let span = self.span.clone();
        let _entered = span.enter();

        let wake = self.take_signal();
        if let Some(outcome) = self.apply_wake(wake) {
            return outcome;
        }
        self.execute()
    }

    /* ===================== Loop ===================== */

    fn execute(&mut self) -> StepOutcome {
        let machine = Arc::clone(&self.machine);
        let mut executed: u64 = 0;

        loop {
            if let Some(outcome) = &self.outcome {
                return outcome.clone();
            }

            if let Some(limit) = self.settings.max_instructions_per_step {
                if executed == limit {
                    warn!(limit, pc = self.frame.pc, "instruction budget exhausted");
                    self.raise(Fault::FuelExhausted { limit });
                    // Cleanup gets a fresh budget
                    executed = 0;
                    continue;
                }
            }
            executed += 1;

            let Some(instr) = machine.instrs.get(self.frame.pc) else {
                let fault = Fault::internal(format!("pc {} out of range", self.frame.pc));
                return self.finish(Pending::Fault { fault });
            };
            if self.settings.trace_instructions {
                trace!(pc = self.frame.pc, %instr, "exec");
            }

            match instr {
                Instr::Label { .. } => self.frame.pc += 1,

                Instr::Assign { local, value } => match self.eval(value) {
                    Ok(val) => {
                        self.frame.locals.insert(local.clone(), val);
                        self.frame.pc += 1;
                    }
                    Err(fault) => self.raise(fault),
                },

                Instr::Eval { value } => match self.eval(value) {
                    Ok(_) => self.frame.pc += 1,
                    Err(fault) => self.raise(fault),
                },

                Instr::Jump { target } => self.jump(*target),

                Instr::JumpIfFalse { test, target } => match self.eval(test) {
                    Ok(val) if val.is_truthy() => self.frame.pc += 1,
                    Ok(_) => self.jump(*target),
                    Err(fault) => self.raise(fault),
                },

                Instr::EnterGuard { region, finally } => {
                    self.frame.guards.push(GuardFrame {
                        region: *region,
                        finally: *finally,
                        exited: false,
                    });
                    self.frame.pc += 1;
                }

                Instr::LeaveGuard { region } => match self.frame.guards.pop() {
                    Some(guard) if guard.region == *region => self.frame.pc += 1,
                    other => self.raise(Fault::internal(format!(
                        "leave_guard {} with {:?} on top",
                        region,
                        other.map(|g| g.region)
                    ))),
                },

                Instr::Release { holder } => self.release(holder),

                Instr::EndFinally => match self.frame.pending.take() {
                    None => self.frame.pc += 1,
                    Some(pending) => self.unwind(pending),
                },

                Instr::MarkGuardExited { region } => {
                    self.mark_guard_exited(*region);
                    self.frame.pc += 1;
                }

                Instr::Transition {
                    state,
                    awaiter,
                    landing,
                } => self.transition(*state, awaiter, *landing),

                Instr::Return { value } => match self.eval(value) {
                    Ok(value) => self.unwind(Pending::Return { value }),
                    Err(fault) => self.raise(fault),
                },

                Instr::ReturnToCaller => {
                    // Completion may have been admitted while subscribing
                    let wake = self.take_signal();
                    if wake == Wake::Running {
                        let fault = Fault::internal("reached return_to_caller without suspending");
                        return self.finish(Pending::Fault { fault });
                    }
                    if let Some(outcome) = self.apply_wake(wake) {
                        return outcome;
                    }
                }
            }
        }
    }

    /* ===================== Signals ===================== */

    /// Act on a consumed signal. Returns an outcome when the step ends here.
    fn apply_wake(&mut self, wake: Wake) -> Option<StepOutcome> {
        match wake {
            Wake::Running => None,
            Wake::Idle(state) => Some(StepOutcome::Suspended { state }),
            Wake::Resume(state) => self.resume(state),
            Wake::Cancel(state) => {
                self.cancel_unwind(state);
                None
            }
        }
    }

    /// Continue at the landing of `state`, or stay suspended if its task is still running
    fn resume(&mut self, state: StateId) -> Option<StepOutcome> {
        if let Some(Val::Awaiter(task)) = self.frame.locals.get(&Machine::awaiter_holder(state)) {
            if self.host.poll_task(*task).is_none() {
                debug!(%state, task, "completion before the task settled, staying suspended");
                let epoch = self.frame.epoch;
                self.shared.state.store(MachineState::suspended(state, epoch));
                return Some(StepOutcome::Suspended { state });
            }
        }

        debug!(%state, "resumed");
        if let Err(fault) = advance(&mut self.frame.phases, state, SuspensionPhase::Resumed) {
            self.raise(fault);
            return None;
        }
        for guard in &mut self.frame.guards {
            guard.exited = false;
        }
        match self.machine.landing(state) {
            Some(landing) => self.jump(landing),
            None => self.raise(Fault::internal(format!("no landing for {}", state))),
        }
        None
    }

    /// Unwind the frames marked exited, releasing each owed resource once
    fn cancel_unwind(&mut self, state: StateId) {
        debug!(%state, owed = ?self.owed_cleanup(), "cancelled");
        if let Err(fault) = advance(&mut self.frame.phases, state, SuspensionPhase::Faulted) {
            return self.raise(fault);
        }
        let before = self.frame.guards.len();
        self.frame.guards.retain(|g| g.exited);
        if self.frame.guards.len() != before {
            warn!(
                dropped = before - self.frame.guards.len(),
                "guard frames not marked exited are skipped on cancellation"
            );
        }
        self.raise(Fault::Cancelled { state });
    }

    /* ===================== Instructions ===================== */

    fn eval(&mut self, value: &Value) -> Result<Val, Fault> {
        eval::eval(
            value,
            &mut Env {
                locals: &self.frame.locals,
                host: self.host.as_ref(),
                phases: Some(&mut self.frame.phases),
            },
        )
    }

    fn jump(&mut self, label: Label) {
        match self.machine.position(label) {
            Some(pc) => self.frame.pc = pc,
            None => {
                let fault = Fault::internal(format!("jump to unknown label {}", label));
                self.finish(Pending::Fault { fault });
            }
        }
    }

    fn release(&mut self, holder: &str) {
        // Cleared before releasing: a resource is released at most once
        let held = self.frame.locals.insert(holder.to_string(), Val::Null);
        match held {
            Some(Val::Resource(resource)) => match self.host.release(resource) {
                Ok(()) => {
                    trace!(resource, holder, "released");
                    self.frame.pc += 1;
                }
                Err(fault) => self.raise(fault),
            },
            Some(Val::Null) | None => self.frame.pc += 1,
            Some(other) => self.raise(Fault::mismatch("resource", other.kind())),
        }
    }

    fn transition(&mut self, state: StateId, awaiter: &str, landing: Label) {
        if let Err(fault) = advance(&mut self.frame.phases, state, SuspensionPhase::AwaiterObtained) {
            return self.raise(fault);
        }
        let task = match self.frame.locals.get(awaiter) {
            Some(Val::Awaiter(task)) => Ok(*task),
            Some(other) => Err(Fault::mismatch("awaiter", other.kind())),
            None => Err(Fault::UndefinedLocal {
                name: awaiter.to_string(),
            }),
        };
        let task = match task {
            Ok(task) => task,
            Err(fault) => return self.raise(fault),
        };

        if self.host.poll_task(task).is_some() {
            // Already complete: no observable suspension
            trace!(%state, task, "awaiter already complete");
            if let Err(fault) = advance(&mut self.frame.phases, state, SuspensionPhase::Resumed) {
                return self.raise(fault);
            }
            for guard in &mut self.frame.guards {
                guard.exited = false;
            }
            return self.jump(landing);
        }

        let epoch = self.frame.epoch.wrapping_add(1) & EPOCH_MASK;
        if !self
            .shared
            .state
            .compare_and_set(MachineState::running(), MachineState::suspended(state, epoch))
        {
            let current = self.status();
            return self.raise(Fault::internal(format!(
                "suspending at {} while {:?}",
                state, current
            )));
        }
        self.frame.epoch = epoch;
        if let Err(fault) = advance(&mut self.frame.phases, state, SuspensionPhase::Suspended) {
            return self.raise(fault);
        }
        debug!(%state, epoch, task, "suspended");

        self.host.subscribe(task, self.notifier(state));
        self.frame.pc += 1;
    }

    /* ===================== Control Flow ===================== */

    fn raise(&mut self, fault: Fault) {
        debug!(%fault, pc = self.frame.pc, "fault raised");
        self.unwind(Pending::Fault { fault });
    }

    /// Route a return or fault through the innermost guard frame's finally block
    fn unwind(&mut self, pending: Pending) {
        match self.frame.guards.pop() {
            Some(guard) => {
                self.frame.pending = Some(pending);
                self.jump(guard.finally);
            }
            None => {
                self.finish(pending);
            }
        }
    }

    fn finish(&mut self, pending: Pending) -> StepOutcome {
        let (outcome, phase) = match pending {
            Pending::Return { value } => (StepOutcome::Completed { value }, Phase::Completed),
            Pending::Fault { fault } => (StepOutcome::Faulted { fault }, Phase::Faulted),
        };
        self.frame.pending = None;
        self.shared.state.store(MachineState::at(phase, StateId(0)));
        debug!(?outcome, "machine finished");
        self.outcome = Some(outcome.clone());
        outcome
    }
}
