//! Placeholder registry
//!
//! Arena of forward references to region ids that are not known yet when a node
//! is composed. Slots are allocated at composition time, resolved while lowering
//! reaches the region that binds them, and checked once in a finalization pass.

use crate::error::LoweringError;
use crate::types::{PlaceholderId, RegionId};
use serde::{Deserialize, Serialize};

/// Forward reference to an id that the lowering pass assigns later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaceholderNode {
    pub id: PlaceholderId,
}

#[derive(Debug, Clone, Default)]
pub struct PlaceholderRegistry {
    slots: Vec<Option<RegionId>>,
    sealed: bool,
}

impl PlaceholderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh unresolved slot
    pub fn allocate(&mut self) -> Result<PlaceholderNode, LoweringError> {
        if self.sealed {
            return Err(LoweringError::RegistrySealed);
        }
        let id = PlaceholderId(self.slots.len() as u32);
        self.slots.push(None);
        Ok(PlaceholderNode { id })
    }

    /// Bind a slot to its region. Each slot resolves exactly once.
    pub fn resolve(&mut self, id: PlaceholderId, region: RegionId) -> Result<(), LoweringError> {
        if self.sealed {
            return Err(LoweringError::RegistrySealed);
        }
        let slot = self
            .slots
            .get_mut(id.0 as usize)
            .ok_or(LoweringError::UnknownPlaceholder(id))?;

        match slot {
            Some(existing) => Err(LoweringError::PlaceholderAlreadyBound {
                id,
                region: *existing,
            }),
            None => {
                *slot = Some(region);
                Ok(())
            }
        }
    }

    /// Resolved region of a slot
    pub fn lookup(&self, id: PlaceholderId) -> Result<RegionId, LoweringError> {
        self.slots
            .get(id.0 as usize)
            .ok_or(LoweringError::UnknownPlaceholder(id))?
            .ok_or(LoweringError::UnresolvedPlaceholder(id))
    }

    /// Seal the registry, failing on the first slot that was never resolved
    pub fn finalize(&mut self) -> Result<(), LoweringError> {
        self.sealed = true;
        match self.slots.iter().position(Option::is_none) {
            Some(index) => Err(LoweringError::UnresolvedPlaceholder(PlaceholderId(
                index as u32,
            ))),
            None => Ok(()),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
