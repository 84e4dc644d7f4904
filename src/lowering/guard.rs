//! Guard-Exit Coordinator
//!
//! Tracks the guarded regions open at the current point of the traversal. Before
//! every yield it emits one `MarkGuardExited` per enclosing region, innermost
//! first, so a driver torn down while suspended knows which regions owe cleanup.
//! Guard exits composed against a placeholder are emitted with a dummy region and
//! back-patched once the registry is final.

use super::lir::{Instr, RegionInfo};
use crate::error::LoweringError;
use crate::nodes::{PlaceholderNode, PlaceholderRegistry};
use crate::types::{Label, PlaceholderId, RegionId};

#[derive(Debug)]
struct OpenRegion {
    id: RegionId,
    holder: String,
    finally: Label,
    first_state: u32,
}

#[derive(Debug, Default)]
pub struct GuardCoordinator {
    open: Vec<OpenRegion>,
    next_region: u32,
    /// Instruction indices still naming a placeholder
    deferred: Vec<(usize, PlaceholderId)>,
}

impl GuardCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next opened region will get
    pub fn next_id(&self) -> RegionId {
        RegionId(self.next_region)
    }

    pub fn open(&mut self, holder: String, finally: Label, first_state: u32) -> RegionId {
        let id = self.next_id();
        self.next_region += 1;
        self.open.push(OpenRegion {
            id,
            holder,
            finally,
            first_state,
        });
        id
    }

    /// Close the innermost region, recording the StateIds assigned inside it
    pub fn close(&mut self, end_state: u32) -> Option<RegionInfo> {
        let region = self.open.pop()?;
        Some(RegionInfo {
            id: region.id,
            holder: region.holder,
            finally: region.finally,
            first_state: region.first_state,
            end_state,
            parent: self.open.last().map(|r| r.id),
        })
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Marks emitted before a yield, innermost region first
    pub fn exit_marks(&self) -> Vec<Instr> {
        self.open
            .iter()
            .rev()
            .map(|region| Instr::MarkGuardExited { region: region.id })
            .collect()
    }

    /// Remember that the instruction at `index` names `placeholder`
    pub fn defer(&mut self, index: usize, placeholder: PlaceholderNode) {
        self.deferred.push((index, placeholder.id));
    }

    /// Back-patch deferred guard exits with their resolved regions
    pub fn patch(
        &mut self,
        instrs: &mut [Instr],
        registry: &PlaceholderRegistry,
    ) -> Result<(), LoweringError> {
        for (index, placeholder) in self.deferred.drain(..) {
            let region = registry.lookup(placeholder)?;
            instrs[index] = Instr::MarkGuardExited { region };
        }
        Ok(())
    }
}
