//! The memory manager: frame table, per-task page tables, the clock
//! replacer and the fault state machine, driven by references from
//! threads and by completions of swap I/O.

mod fault;
mod io;
mod mmu;


use std::collections::{HashMap, VecDeque};

use log::{error, info};
use memory::PhysicalMemory;

pub use fault::{FaultProgress, FaultStage};
pub use io::{IoOp, IoRequest};
pub use mmu::{Access, LockState, Reference, ReferenceStatus};

use crate::{
    common::{FaultId, FrameId, PageRef, TaskId, ThreadId},
    config::MemoryConfig,
    error::{FaultOutcome, LockOutcome, VmError},
    frame_table::{FrameTable, FrameTableEntry},
    interrupt::InterruptVector,
    page_table::{PageTable, PageTableEntry},
    replacer::ClockReplacer,
    scheduler::Scheduler,
    swap::BackingStore,
};

use self::fault::Fault;

/// Something that finished while the caller was not looking: a fault, a
/// reference that piggy-backed on someone else's fault, or a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Fault {
        thread: ThreadId,
        page: PageRef,
        outcome: FaultOutcome,
    },
    Reference {
        thread: ThreadId,
        page: PageRef,
        resident: bool,
    },
    Lock {
        thread: ThreadId,
        page: PageRef,
        outcome: LockOutcome,
    },
}

pub struct MemoryManager<S: BackingStore> {
    config: MemoryConfig,
    frames: FrameTable,
    page_tables: HashMap<TaskId, PageTable>,
    next_task: u32,
    replacer: ClockReplacer,
    scheduler: Scheduler,
    interrupts: InterruptVector,
    memory: PhysicalMemory,
    store: S,
    faults: HashMap<FaultId, Fault>,
    next_fault: u64,
    io_queue: VecDeque<IoRequest>,
    next_io: u64,
    resolutions: Vec<Resolution>,
}

impl<S: BackingStore> MemoryManager<S> {
    pub fn init(config: MemoryConfig, store: S) -> Result<Self, VmError> {
        config.validate()?;
        if let Some(block_size) = store.block_size() {
            if block_size != config.page_size() {
                return Err(VmError::Config(format!(
                    "swap blocks are {} bytes but pages are {} bytes",
                    block_size,
                    config.page_size()
                )));
            }
        }
        info!(
            "Memory manager up: {} frames of {} bytes, {} pages per task",
            config.frame_count,
            config.page_size(),
            config.page_count()
        );
        Ok(Self {
            config,
            frames: FrameTable::init(config.frame_count),
            page_tables: HashMap::new(),
            next_task: 0,
            replacer: ClockReplacer::new(config.want_free),
            scheduler: Scheduler::init(),
            interrupts: InterruptVector::new(),
            memory: PhysicalMemory::init(config.frame_count, config.page_size()),
            store,
            faults: HashMap::new(),
            next_fault: 0,
            io_queue: VecDeque::new(),
            next_io: 0,
            resolutions: Vec::new(),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn create_task(&mut self) -> TaskId {
        let task = TaskId(self.next_task);
        self.next_task += 1;
        self.page_tables
            .insert(task, PageTable::init(task, self.config.page_count()));
        info!("Created {} with {} pages", task, self.config.page_count());
        task
    }

    pub fn spawn_thread(&mut self, task: TaskId) -> Result<ThreadId, VmError> {
        if !self.page_tables.contains_key(&task) {
            return Err(VmError::NoSuchTask(task));
        }
        Ok(self.scheduler.spawn(task))
    }

    pub fn kill_thread(&mut self, thread: ThreadId) -> Result<(), VmError> {
        if !self.scheduler.contains(thread) {
            return Err(VmError::NoSuchThread(thread));
        }
        self.scheduler.kill(thread);
        Ok(())
    }

    /// Tears a task down: its threads are killed and every frame it
    /// occupies or has reserved goes back to the free pool. Faults still in
    /// flight for it unwind when their I/O completes.
    pub fn exit_task(&mut self, task: TaskId) -> Result<(), VmError> {
        let mut table = self
            .page_tables
            .remove(&task)
            .ok_or(VmError::NoSuchTask(task))?;
        for thread in self.scheduler.threads_of(task) {
            self.scheduler.kill(thread);
        }
        table.deallocate_memory(&mut self.frames);
        if let Err(e) = self.store.release(task) {
            error!("Could not release swap area of {}: {}", task, e);
        }
        info!("{} exited", task);
        Ok(())
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn frame(&self, frame: FrameId) -> Option<&FrameTableEntry> {
        self.frames.get(frame)
    }

    pub fn free_frame_count(&self) -> usize {
        self.frames.free_count()
    }

    pub fn page_table(&self, task: TaskId) -> Option<&PageTable> {
        self.page_tables.get(&task)
    }

    pub fn page(&self, page: PageRef) -> Option<&PageTableEntry> {
        self.page_tables.get(&page.task)?.get(page.page)
    }

    pub(crate) fn page_mut(&mut self, page: PageRef) -> Option<&mut PageTableEntry> {
        self.page_tables.get_mut(&page.task)?.get_mut(page.page)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn replacer(&self) -> &ClockReplacer {
        &self.replacer
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn take_resolutions(&mut self) -> Vec<Resolution> {
        std::mem::take(&mut self.resolutions)
    }

    /// Checks the frame/page cross references. Every occupied frame points
    /// at a page that points back, and that page is valid unless the frame
    /// is mid-fault.
    pub fn check_consistency(&self) -> Result<(), VmError> {
        for frame in self.frames.iter() {
            let Some(page) = frame.occupant() else {
                continue;
            };
            let entry = self.page(page).ok_or_else(|| {
                VmError::Inconsistent(format!("frame {} holds missing {}", frame.id(), page))
            })?;
            if entry.frame() != Some(frame.id()) {
                return Err(VmError::Inconsistent(format!(
                    "frame {} holds {} which points at {:?}",
                    frame.id(),
                    page,
                    entry.frame()
                )));
            }
            if !entry.is_valid() && !frame.is_reserved() {
                return Err(VmError::Inconsistent(format!(
                    "frame {} holds invalid {} outside a fault",
                    frame.id(),
                    page
                )));
            }
        }
        for (task, table) in self.page_tables.iter() {
            for (number, entry) in table.iter() {
                let page = PageRef::new(*task, number);
                if entry.is_valid() {
                    let frame = entry.frame().and_then(|f| self.frames.get(f));
                    if frame.and_then(|f| f.occupant()) != Some(page) {
                        return Err(VmError::Inconsistent(format!(
                            "valid {} is not the occupant of its frame",
                            page
                        )));
                    }
                } else if entry.validating_thread().is_none() && entry.frame().is_some() {
                    return Err(VmError::Inconsistent(format!(
                        "{} keeps a frame with no fault in flight",
                        page
                    )));
                }
                if entry.validating_thread().is_none() && !entry.waiters().is_empty() {
                    return Err(VmError::Inconsistent(format!(
                        "{} has waiters but no fault in flight",
                        page
                    )));
                }
            }
        }
        Ok(())
    }
}
