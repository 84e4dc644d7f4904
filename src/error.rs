//! Error taxonomy
//!
//! - [`ConstructionError`]: raised while composing nodes, before lowering
//! - [`LoweringError`]: raised by the lowering pass and its finalization
//! - [`Fault`]: runtime failure carried through a machine's guarded regions
//! - [`SnapshotError`]: restoring a persisted driver against the wrong machine

use crate::types::{PlaceholderId, RegionId, StateId, TaskId, Ty};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error("type `{ty}` has no obtain-awaiter operation")]
    MissingAwaiterCapability { ty: Ty },

    #[error("awaiter type `{ty}` has no fetch-result operation")]
    MissingResultCapability { ty: Ty },

    #[error("type `{ty}` has no release operation")]
    MissingReleaseCapability { ty: Ty },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoweringError {
    #[error("placeholder {0} was never resolved")]
    UnresolvedPlaceholder(PlaceholderId),

    #[error("placeholder {id} already resolved to {region}")]
    PlaceholderAlreadyBound { id: PlaceholderId, region: RegionId },

    #[error("placeholder {0} does not belong to this registry")]
    UnknownPlaceholder(PlaceholderId),

    #[error("placeholder registry is finalized")]
    RegistrySealed,

    #[error("label L{0} was allocated but never placed")]
    UnplacedLabel(u32),

    #[error("suspend transition for {0} composed outside a suspension point")]
    ComposedSuspend(StateId),

    #[error("suspend transition bound to placeholder {0}")]
    DeferredSuspend(PlaceholderId),
}

/// Runtime failure
///
/// Faults propagate unmodified through guarded regions; the driver only decides
/// where they surface. Serializable so a pending fault survives persistence.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Fault {
    #[error("host error: {message}")]
    Host { message: String },

    #[error("task {task} failed: {message}")]
    TaskFailed { task: TaskId, message: String },

    #[error("task {task} has not completed")]
    TaskPending { task: TaskId },

    #[error("cancelled while suspended at {state}")]
    Cancelled { state: StateId },

    #[error("undefined local `{name}`")]
    UndefinedLocal { name: String },

    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("instruction budget of {limit} exhausted")]
    FuelExhausted { limit: u64 },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Fault {
    pub fn host(message: impl Into<String>) -> Self {
        Fault::Host {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Fault::Internal {
            message: message.into(),
        }
    }

    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Fault::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot was taken from machine {found}, expected {expected}")]
    FingerprintMismatch { expected: String, found: String },

    #[error("snapshot is suspended at {0}, which is not in the jump table")]
    UnknownState(StateId),
}
