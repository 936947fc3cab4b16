mod frame_table_entry;

use log::{debug, trace};

pub use frame_table_entry::FrameTableEntry;

use crate::common::{FrameId, PageRef, TaskId};

/// Every physical frame in the machine, indexed by frame id. Holds state
/// only; choosing frames is left to the fault handler and the replacer.
#[derive(Debug, Clone)]
pub struct FrameTable {
    entries: Vec<FrameTableEntry>,
}

impl FrameTable {
    pub fn init(frame_count: usize) -> Self {
        Self {
            entries: (0..frame_count).map(FrameTableEntry::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, frame: FrameId) -> Option<&FrameTableEntry> {
        self.entries.get(frame)
    }

    pub(crate) fn get_mut(&mut self, frame: FrameId) -> Option<&mut FrameTableEntry> {
        self.entries.get_mut(frame)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameTableEntry> {
        self.entries.iter()
    }

    pub fn find_free(&self) -> Option<FrameId> {
        self.entries.iter().find(|f| f.is_free()).map(|f| f.id())
    }

    pub fn free_count(&self) -> usize {
        self.entries.iter().filter(|f| f.is_free()).count()
    }

    /// Reserves `frame` for `task`. A pinned frame is never reserved over,
    /// pin holders keep the stronger claim.
    pub(crate) fn reserve(&mut self, frame: FrameId, task: TaskId) -> bool {
        match self.entries.get_mut(frame) {
            Some(entry) if !entry.is_locked() => {
                entry.reserved_by = Some(task);
                debug!("Frame {} reserved by {}", frame, task);
                true
            }
            _ => false,
        }
    }

    /// Releases the reservation only if `task` still holds it.
    pub(crate) fn unreserve(&mut self, frame: FrameId, task: TaskId) {
        if let Some(entry) = self.entries.get_mut(frame) {
            if entry.reserved_by == Some(task) {
                entry.reserved_by = None;
                debug!("Frame {} unreserved by {}", frame, task);
            }
        }
    }

    pub(crate) fn set_occupant(&mut self, frame: FrameId, page: Option<PageRef>) {
        if let Some(entry) = self.entries.get_mut(frame) {
            entry.occupant = page;
        }
    }

    /// Marks the frame accessed; a write also marks it dirty.
    pub(crate) fn touch(&mut self, frame: FrameId, write: bool) {
        if let Some(entry) = self.entries.get_mut(frame) {
            entry.referenced = true;
            if write {
                entry.dirty = true;
            }
            trace!(
                "Frame {} touched (referenced, dirty = {})",
                frame,
                entry.dirty
            );
        }
    }

    /// Reclaims every frame occupied or reserved by `task`. Returns the
    /// frames that were released.
    ///
    /// A reserved frame still holding another task's page (a victim whose
    /// write-back is in flight) only loses the reservation; the victim stays
    /// mapped.
    pub(crate) fn deallocate_task(&mut self, task: TaskId) -> Vec<FrameId> {
        let mut released = Vec::new();
        for entry in self.entries.iter_mut() {
            let occupied = entry.occupant.map(|p| p.task) == Some(task);
            let reserved = entry.reserved_by == Some(task);
            if !occupied && !reserved {
                continue;
            }
            if occupied || entry.occupant.is_none() {
                entry.clear();
            }
            if reserved {
                entry.reserved_by = None;
            }
            released.push(entry.id());
        }
        released
    }
}
