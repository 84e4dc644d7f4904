//! Per-suspension phase tracking
//!
//! Every StateId a driver touches moves through these phases. They are serialized
//! with the frame so a restored driver keeps rejecting illegal transitions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SuspensionPhase {
    Created = 0,
    /// Awaiter obtained, transition instruction reached
    AwaiterObtained = 1,
    /// Driver yielded at this state
    Suspended = 2,
    /// Control is back at the landing label
    Resumed = 3,
    /// Fetch-result succeeded
    Completed = 4,
    Faulted = 5,
}

impl SuspensionPhase {
    pub fn can_advance(self, to: SuspensionPhase) -> bool {
        use SuspensionPhase::*;
        matches!(
            (self, to),
            (Created, AwaiterObtained)
                | (Created, Faulted)
                | (AwaiterObtained, Suspended)
                | (AwaiterObtained, Resumed)
                | (Suspended, Resumed)
                | (Suspended, Faulted)
                | (Resumed, Completed)
                | (Resumed, Faulted)
                // Re-entered by a loop
                | (Completed, AwaiterObtained)
                | (Faulted, AwaiterObtained)
        )
    }
}
