use log::{debug, info, warn};

use super::{io::IoOp, MemoryManager, Resolution};
use crate::{
    common::{FaultId, FrameId, PageRef, ReferenceKind, TaskId, ThreadId},
    error::{FaultOutcome, LockOutcome, VmError},
    page_table::Waiter,
    scheduler::WaitQueue,
    swap::BackingStore,
};

/// Where a suspended fault is parked. A fault only lives in the arena while
/// it waits for one of these two transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStage {
    SwappingOut { victim: PageRef },
    SwappingIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultProgress {
    /// The faulting thread is parked until the fault's I/O completes.
    Suspended(FaultId),
    Resolved(FaultOutcome),
}

#[derive(Debug)]
pub(crate) struct Fault {
    pub(crate) thread: ThreadId,
    pub(crate) task: TaskId,
    pub(crate) kind: ReferenceKind,
    pub(crate) page: PageRef,
    pub(crate) frame: FrameId,
    pub(crate) stage: FaultStage,
    /// Completion event of this fault; holds only the initiating thread,
    /// piggy-backers wait on the page instead.
    pub(crate) completion: WaitQueue<ThreadId>,
}

impl<S: BackingStore> MemoryManager<S> {
    /// Entry point of the page-fault interrupt.
    ///
    /// Picks a frame (free search first, then the clock), reserves it for
    /// the faulting task, parks the thread and starts the swap-out of a
    /// dirty victim or the swap-in of the page. Everything after that runs
    /// from [`MemoryManager::complete_io`].
    pub fn handle_page_fault(
        &mut self,
        thread: ThreadId,
        kind: ReferenceKind,
        page: PageRef,
    ) -> Result<FaultProgress, VmError> {
        let task = self
            .scheduler
            .task_of(thread)
            .ok_or(VmError::NoSuchThread(thread))?;
        let entry = self.page(page).ok_or(VmError::NoSuchPage(page))?;
        let (valid, in_flight) = (entry.is_valid(), entry.validating_thread());

        if valid {
            warn!("Page fault on resident {} by {}", page, thread);
            return Ok(self.resolve_immediately(thread, page, FaultOutcome::Failure));
        }
        if let Some(other) = in_flight.filter(|other| *other != thread) {
            warn!("{} already has a fault in flight by {}", page, other);
            return Ok(self.resolve_immediately(thread, page, FaultOutcome::Failure));
        }
        if let Some(entry) = self.page_mut(page) {
            entry.validating_thread = Some(thread);
        }
        info!("Page fault: {:?} of {} by {}", kind, page, thread);

        let Some(frame) = self.select_frame() else {
            warn!("Not enough memory to bring in {}", page);
            if let Some(entry) = self.page_mut(page) {
                entry.validating_thread = None;
            }
            self.release_page_waiters(page);
            return Ok(self.resolve_immediately(thread, page, FaultOutcome::NotEnoughMemory));
        };
        debug!("{} gets frame {}", page, frame);
        self.frames.reserve(frame, task);

        let id = FaultId(self.next_fault);
        self.next_fault += 1;
        let mut completion = WaitQueue::new();
        completion.push(thread);
        self.scheduler.suspend(thread);

        let mut fault = Fault {
            thread,
            task,
            kind,
            page,
            frame,
            stage: FaultStage::SwappingIn,
            completion,
        };

        let (occupant, dirty) = match self.frames.get(frame) {
            Some(f) => (f.occupant(), f.is_dirty()),
            None => (None, false),
        };
        match occupant {
            Some(victim) if victim != page && dirty => {
                fault.stage = FaultStage::SwappingOut { victim };
                self.submit_io(id, thread, IoOp::SwapOut, victim, frame);
                self.faults.insert(id, fault);
            }
            Some(victim) if victim != page => {
                self.detach_victim(victim, frame);
                self.install(id, fault);
            }
            _ => self.install(id, fault),
        }
        Ok(FaultProgress::Suspended(id))
    }

    /// Free frame if there is one, otherwise whatever the clock hands back.
    fn select_frame(&mut self) -> Option<FrameId> {
        if let Some(frame) = self.frames.find_free() {
            return Some(frame);
        }
        let Self {
            replacer,
            frames,
            page_tables,
            ..
        } = self;
        replacer.select_victim(frames, |victim| {
            if let Some(entry) = page_tables
                .get_mut(&victim.task)
                .and_then(|table| table.get_mut(victim.page))
            {
                entry.invalidate();
            }
        })
    }

    /// Unmaps `victim` from `frame` if it is still mapped there.
    fn detach_victim(&mut self, victim: PageRef, frame: FrameId) {
        if let Some(f) = self.frames.get_mut(frame) {
            if f.occupant == Some(victim) {
                f.occupant = None;
                f.referenced = false;
            }
        }
        if let Some(entry) = self.page_mut(victim) {
            if entry.frame == Some(frame) {
                entry.invalidate();
            }
        }
        debug!("Detached {} from frame {}", victim, frame);
    }

    /// Points page and frame at each other and starts the swap-in.
    fn install(&mut self, id: FaultId, mut fault: Fault) {
        if let Some(entry) = self.page_mut(fault.page) {
            entry.frame = Some(fault.frame);
        }
        self.frames.set_occupant(fault.frame, Some(fault.page));
        fault.stage = FaultStage::SwappingIn;
        self.submit_io(id, fault.thread, IoOp::SwapIn, fault.page, fault.frame);
        self.faults.insert(id, fault);
    }

    /// Resumption point after either transfer. Liveness of the faulting
    /// thread is checked before anything is committed.
    pub(super) fn resume_fault(&mut self, id: FaultId) {
        let Some(fault) = self.faults.remove(&id) else {
            return;
        };
        if self.scheduler.is_killed(fault.thread) {
            match fault.stage {
                FaultStage::SwappingOut { .. } => self.unwind_swap_out(fault),
                FaultStage::SwappingIn => self.unwind_swap_in(fault),
            }
            return;
        }
        match fault.stage {
            FaultStage::SwappingOut { victim } => {
                if let Some(frame) = self.frames.get_mut(fault.frame) {
                    frame.dirty = false;
                }
                self.detach_victim(victim, fault.frame);
                self.install(id, fault);
            }
            FaultStage::SwappingIn => self.finish_swap_in(fault),
        }
    }

    fn finish_swap_in(&mut self, fault: Fault) {
        match self.page_mut(fault.page) {
            Some(entry) => {
                entry.valid = true;
                entry.validating_thread = None;
            }
            None => {
                // page table went away under us
                self.unwind_swap_in(fault);
                return;
            }
        }
        self.frames.unreserve(fault.frame, fault.task);
        if let Some(frame) = self.frames.get_mut(fault.frame) {
            frame.occupant = Some(fault.page);
            frame.referenced = true;
            frame.dirty = fault.kind.is_write();
        }
        self.conclude(fault, FaultOutcome::Success);
    }

    /// Thread died while the victim was being written. The victim keeps
    /// its frame; the faulting page goes back to having no fault in flight.
    fn unwind_swap_out(&mut self, fault: Fault) {
        warn!(
            "{} killed during swap-out for {}, abandoning fault",
            fault.thread, fault.page
        );
        self.frames.unreserve(fault.frame, fault.task);
        if let Some(entry) = self.page_mut(fault.page) {
            entry.validating_thread = None;
        }
        self.conclude(fault, FaultOutcome::Failure);
    }

    /// Thread died while the page was being read. Undo the installation
    /// and leave the frame free.
    fn unwind_swap_in(&mut self, fault: Fault) {
        warn!(
            "{} killed during swap-in of {}, undoing installation",
            fault.thread, fault.page
        );
        if let Some(entry) = self.page_mut(fault.page) {
            entry.invalidate();
            entry.validating_thread = None;
        }
        if let Some(frame) = self.frames.get_mut(fault.frame) {
            let ours = frame.occupant == Some(fault.page)
                || (frame.occupant.is_none() && frame.reserved_by == Some(fault.task));
            if ours {
                frame.clear();
            }
        }
        self.frames.unreserve(fault.frame, fault.task);
        self.conclude(fault, FaultOutcome::Failure);
    }

    /// Releases both wait sets, reports the outcome and hands the CPU on.
    fn conclude(&mut self, mut fault: Fault, outcome: FaultOutcome) {
        self.release_page_waiters(fault.page);
        for thread in fault.completion.take_all() {
            self.scheduler.resume(thread);
        }
        info!(
            "Page fault on {} by {} resolved: {:?}",
            fault.page, fault.thread, outcome
        );
        self.resolutions.push(Resolution::Fault {
            thread: fault.thread,
            page: fault.page,
            outcome,
        });
        if fault.kind == ReferenceKind::Lock {
            self.finish_lock(fault.thread, fault.page, outcome == FaultOutcome::Success);
        }
        self.scheduler.dispatch();
    }

    /// Outcome reached without suspending anyone.
    fn resolve_immediately(
        &mut self,
        thread: ThreadId,
        page: PageRef,
        outcome: FaultOutcome,
    ) -> FaultProgress {
        self.resolutions.push(Resolution::Fault {
            thread,
            page,
            outcome,
        });
        self.scheduler.dispatch();
        FaultProgress::Resolved(outcome)
    }

    /// Wakes every thread parked on the page and runs what each of them was
    /// waiting to do. Killed waiters are dropped.
    pub(super) fn release_page_waiters(&mut self, page: PageRef) {
        let waiters = match self.page_mut(page) {
            Some(entry) => entry.waiters.take_all(),
            None => return,
        };
        let resident = self
            .page(page)
            .filter(|entry| entry.is_valid())
            .and_then(|entry| entry.frame());
        for waiter in waiters {
            let thread = waiter.thread();
            if self.scheduler.is_killed(thread) {
                if let Waiter::Lock { .. } = waiter {
                    self.resolutions.push(Resolution::Lock {
                        thread,
                        page,
                        outcome: LockOutcome::Failure,
                    });
                }
                continue;
            }
            self.scheduler.resume(thread);
            match waiter {
                Waiter::Refer { kind, .. } => {
                    if let Some(frame) = resident {
                        self.frames.touch(frame, kind.is_write());
                    }
                    self.resolutions.push(Resolution::Reference {
                        thread,
                        page,
                        resident: resident.is_some(),
                    });
                }
                Waiter::Lock { .. } => self.finish_lock(thread, page, true),
            }
        }
    }

    /// Pins the page's frame if the lock can still go through.
    pub(super) fn finish_lock(&mut self, thread: ThreadId, page: PageRef, fault_ok: bool) {
        let frame = self
            .page(page)
            .filter(|entry| entry.is_valid())
            .and_then(|entry| entry.frame());
        let outcome = match frame {
            Some(frame) if fault_ok && !self.scheduler.is_killed(thread) => {
                if let Some(f) = self.frames.get_mut(frame) {
                    f.increment_lock_count();
                }
                LockOutcome::Success
            }
            _ => LockOutcome::Failure,
        };
        debug!("Lock of {} by {}: {:?}", page, thread, outcome);
        self.resolutions.push(Resolution::Lock {
            thread,
            page,
            outcome,
        });
    }

    /// Stage of the fault currently in flight for `page`, if any.
    pub fn fault_stage(&self, page: PageRef) -> Option<FaultStage> {
        self.faults
            .values()
            .find(|fault| fault.page == page)
            .map(|fault| fault.stage)
    }

    pub fn faults_in_flight(&self) -> usize {
        self.faults.len()
    }
}
