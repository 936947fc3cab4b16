use crate::common::{FrameId, PageRef, TaskId};

/// One physical frame. Carries the simulated hardware access bits, a pin
/// count and the reservation that keeps other faults from stealing the
/// frame while it is being filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTableEntry {
    id: FrameId,
    pub(crate) occupant: Option<PageRef>,
    pub(crate) referenced: bool,
    pub(crate) dirty: bool,
    pub(crate) lock_count: u32,
    pub(crate) reserved_by: Option<TaskId>,
}

impl FrameTableEntry {
    pub(super) fn new(id: FrameId) -> Self {
        FrameTableEntry {
            id,
            occupant: None,
            referenced: false,
            dirty: false,
            lock_count: 0,
            reserved_by: None,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn occupant(&self) -> Option<PageRef> {
        self.occupant
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    pub fn is_locked(&self) -> bool {
        self.lock_count > 0
    }

    pub fn reserved_by(&self) -> Option<TaskId> {
        self.reserved_by
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved_by.is_some()
    }

    /// Free means handed out by the free-frame search: nothing mapped,
    /// nobody mid-fault on it and no pins.
    pub fn is_free(&self) -> bool {
        self.occupant.is_none() && !self.is_reserved() && !self.is_locked()
    }

    /// Eligible for the replacement policy at all.
    pub fn is_evictable(&self) -> bool {
        !self.is_reserved() && !self.is_locked()
    }

    pub(crate) fn increment_lock_count(&mut self) {
        self.lock_count += 1;
    }

    pub(crate) fn decrement_lock_count(&mut self) {
        self.lock_count = self.lock_count.saturating_sub(1);
    }

    /// Drops the occupant and both access bits. Leaves pins and the
    /// reservation alone.
    pub(crate) fn clear(&mut self) {
        self.occupant = None;
        self.dirty = false;
        self.referenced = false;
    }
}
