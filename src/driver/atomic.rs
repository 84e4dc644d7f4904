//! Atomic machine state
//!
//! The single authoritative state field of a driver. Phase, suspension epoch and
//! StateId are packed into one `u64` so that "suspended at state N" can be claimed
//! with a single compare-and-set, whichever thread a completion or cancellation
//! arrives on.
//!
//! A loop reaches the same StateId once per iteration. The epoch tells those
//! suspensions apart, so a signal meant for an earlier one loses the
//! compare-and-set.
//!
//! ```text
//!  63      56 55          32 31           0
//! +----------+--------------+--------------+
//! |  phase   | epoch (24b)  |   StateId    |
//! +----------+--------------+--------------+
//! ```

use crate::types::StateId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    Running = 0,
    /// Yielded at a state, waiting for a signal
    Suspended = 1,
    /// A signal for the suspended state was admitted; the owner has not consumed it
    Signaled = 2,
    Completed = 3,
    Faulted = 4,
}

/// Epochs wrap within 24 bits
pub const EPOCH_MASK: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineState {
    pub phase: Phase,
    pub state: StateId,
    /// Which suspension at `state` this is; always masked to [`EPOCH_MASK`]
    pub epoch: u32,
}

impl MachineState {
    pub fn running() -> Self {
        Self::at(Phase::Running, StateId(0))
    }

    pub fn suspended(state: StateId, epoch: u32) -> Self {
        Self::at(Phase::Suspended, state).with_epoch(epoch)
    }

    pub fn signaled(state: StateId, epoch: u32) -> Self {
        Self::at(Phase::Signaled, state).with_epoch(epoch)
    }

    pub fn at(phase: Phase, state: StateId) -> Self {
        Self {
            phase,
            state,
            epoch: 0,
        }
    }

    pub fn with_epoch(self, epoch: u32) -> Self {
        Self {
            epoch: epoch & EPOCH_MASK,
            ..self
        }
    }

    fn pack(self) -> u64 {
        ((self.phase as u64) << 56)
            | (((self.epoch & EPOCH_MASK) as u64) << 32)
            | self.state.0 as u64
    }

    fn unpack(bits: u64) -> Self {
        let phase = match (bits >> 56) as u8 {
            1 => Phase::Suspended,
            2 => Phase::Signaled,
            3 => Phase::Completed,
            4 => Phase::Faulted,
            _ => Phase::Running,
        };
        Self {
            phase,
            state: StateId(bits as u32),
            epoch: (bits >> 32) as u32 & EPOCH_MASK,
        }
    }
}

#[derive(Debug)]
pub struct AtomicState(AtomicU64);

impl AtomicState {
    pub fn new(initial: MachineState) -> Self {
        Self(AtomicU64::new(initial.pack()))
    }

    pub fn load(&self) -> MachineState {
        MachineState::unpack(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: MachineState) {
        self.0.store(state.pack(), Ordering::Release);
    }

    /// Replace `expected` with `update`. Returns false if the field held anything else.
    pub fn compare_and_set(&self, expected: MachineState, update: MachineState) -> bool {
        self.0
            .compare_exchange(
                expected.pack(),
                update.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_pack_round_trip() {
        for phase in [
            Phase::Running,
            Phase::Suspended,
            Phase::Signaled,
            Phase::Completed,
            Phase::Faulted,
        ] {
            let state = MachineState::at(phase, StateId(u32::MAX - 1)).with_epoch(EPOCH_MASK);
            assert_eq!(MachineState::unpack(state.pack()), state);
        }
    }

    #[test]
    fn test_cas_rejects_stale_state() {
        let cell = AtomicState::new(MachineState::suspended(StateId(2), 1));

        assert!(!cell.compare_and_set(
            MachineState::suspended(StateId(1), 1),
            MachineState::signaled(StateId(1), 1)
        ));
        assert!(cell.compare_and_set(
            MachineState::suspended(StateId(2), 1),
            MachineState::signaled(StateId(2), 1)
        ));
        assert_eq!(cell.load(), MachineState::signaled(StateId(2), 1));
    }

    #[test]
    fn test_cas_rejects_earlier_epoch_at_same_state() {
        let cell = AtomicState::new(MachineState::suspended(StateId(0), 2));

        assert!(!cell.compare_and_set(
            MachineState::suspended(StateId(0), 1),
            MachineState::signaled(StateId(0), 1)
        ));
        assert_eq!(cell.load(), MachineState::suspended(StateId(0), 2));
    }

    #[test]
    fn test_epoch_wraps_within_mask() {
        let state = MachineState::suspended(StateId(7), EPOCH_MASK + 3);
        assert_eq!(state.epoch, 2);
        assert_eq!(MachineState::unpack(state.pack()), state);
    }

    #[test]
    fn test_single_winner_across_threads() {
        let cell = Arc::new(AtomicState::new(MachineState::suspended(StateId(0), 1)));

        let winners: usize = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    cell.compare_and_set(
                        MachineState::suspended(StateId(0), 1),
                        MachineState::signaled(StateId(0), 1),
                    )
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
    }
}
