mod page_table_entry;

use log::info;

pub use page_table_entry::{PageTableEntry, Waiter};

use crate::{
    common::{FrameId, PageNumber, TaskId},
    frame_table::FrameTable,
};

/// Single-level page table of one task. Allocated with the task, every
/// entry starts out invalid.
#[derive(Debug, Clone)]
pub struct PageTable {
    task: TaskId,
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    pub fn init(task: TaskId, page_count: usize) -> Self {
        let mut entries = Vec::with_capacity(page_count);
        entries.resize_with(page_count, PageTableEntry::default);
        Self { task, entries }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, page: PageNumber) -> Option<&PageTableEntry> {
        self.entries.get(page)
    }

    pub(crate) fn get_mut(&mut self, page: PageNumber) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(page)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PageNumber, &PageTableEntry)> {
        self.entries.iter().enumerate()
    }

    pub fn resident_pages(&self) -> usize {
        self.entries.iter().filter(|e| e.valid).count()
    }

    /// Teardown on task exit: gives back every frame this task occupies or
    /// has reserved.
    pub fn deallocate_memory(&mut self, frames: &mut FrameTable) -> Vec<FrameId> {
        let released = frames.deallocate_task(self.task);
        for entry in self.entries.iter_mut() {
            entry.invalidate();
            entry.validating_thread = None;
        }
        info!(
            "Deallocated memory of {}: {} frame(s) released",
            self.task,
            released.len()
        );
        released
    }
}
