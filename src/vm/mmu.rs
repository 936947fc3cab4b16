use log::{debug, trace};

use super::{FaultProgress, MemoryManager};
use crate::{
    common::{PageNumber, PageRef, ReferenceKind, ThreadId},
    error::{FaultOutcome, VmError},
    page_table::Waiter,
    swap::BackingStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceStatus {
    /// Page was resident; access bits updated.
    Hit,
    /// A page fault was raised on behalf of the thread.
    Faulted,
    /// Another thread's fault is bringing the page in; the thread is parked
    /// on the page.
    Waiting,
    /// The thread is dead; nothing was touched.
    Killed,
}

/// What the translator did with a reference. The page is reported even when
/// the reference did not complete so the caller can inspect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub page: PageRef,
    pub status: ReferenceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access<T> {
    Done(T),
    /// The page was not resident; retry once the reference resolves.
    Blocked(Reference),
}

impl<T> Access<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Access::Done(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Acquired,
    /// Completes through a `Resolution::Lock` once the page is in.
    Pending,
    Failed,
}

impl<S: BackingStore> MemoryManager<S> {
    pub fn page_size(&self) -> usize {
        self.config.page_size()
    }

    pub fn page_count(&self) -> usize {
        self.config.page_count()
    }

    pub fn page_number(&self, address: u64) -> PageNumber {
        (address / self.config.page_size() as u64) as PageNumber
    }

    fn check_address(&self, address: u64) -> Result<(), VmError> {
        let size = self.config.address_space_size();
        if address >= size {
            return Err(VmError::AddressOutOfRange { address, size });
        }
        Ok(())
    }

    /// Translates a reference by `thread` to `address`.
    ///
    /// A resident page gets its frame marked referenced (and dirty for a
    /// write). A missing page raises a fault unless one is already in flight,
    /// in which case the thread joins the page's waiters and has the bits
    /// re-applied when it is woken.
    pub fn refer(
        &mut self,
        address: u64,
        kind: ReferenceKind,
        thread: ThreadId,
    ) -> Result<Reference, VmError> {
        let task = self
            .scheduler
            .task_of(thread)
            .ok_or(VmError::NoSuchThread(thread))?;
        self.check_address(address)?;
        let page = PageRef::new(task, self.page_number(address));
        let killed = self.scheduler.is_killed(thread);
        let entry = self.page(page).ok_or(VmError::NoSuchTask(task))?;
        let (valid, frame, in_flight) = (
            entry.is_valid(),
            entry.frame(),
            entry.validating_thread().is_some(),
        );

        let status = if killed {
            ReferenceStatus::Killed
        } else if valid {
            if let Some(frame) = frame {
                self.frames.touch(frame, kind.is_write());
            }
            ReferenceStatus::Hit
        } else if in_flight {
            self.park(page, Waiter::Refer { thread, kind });
            ReferenceStatus::Waiting
        } else {
            self.interrupts.raise(kind, page, thread);
            self.deliver_interrupts()?;
            ReferenceStatus::Faulted
        };
        trace!("{:?} of {:#x} by {}: {:?}", kind, address, thread, status);
        Ok(Reference { page, status })
    }

    fn deliver_interrupts(&mut self) -> Result<(), VmError> {
        while let Some(request) = self.interrupts.take() {
            self.handle_page_fault(request.thread, request.kind, request.page)?;
        }
        Ok(())
    }

    fn physical_address(&self, address: u64, page: PageRef) -> Option<u64> {
        let frame = self.page(page)?.frame()?;
        let page_size = self.config.page_size() as u64;
        Some(frame as u64 * page_size + address % page_size)
    }

    pub fn read_byte(&mut self, address: u64, thread: ThreadId) -> Result<Access<u8>, VmError> {
        let reference = self.refer(address, ReferenceKind::Read, thread)?;
        if reference.status != ReferenceStatus::Hit {
            return Ok(Access::Blocked(reference));
        }
        match self.physical_address(address, reference.page) {
            Some(physical) => Ok(Access::Done(self.memory.read_u8(physical)?)),
            None => Ok(Access::Blocked(reference)),
        }
    }

    pub fn write_byte(
        &mut self,
        address: u64,
        value: u8,
        thread: ThreadId,
    ) -> Result<Access<()>, VmError> {
        let reference = self.refer(address, ReferenceKind::Write, thread)?;
        if reference.status != ReferenceStatus::Hit {
            return Ok(Access::Blocked(reference));
        }
        match self.physical_address(address, reference.page) {
            Some(physical) => Ok(Access::Done(self.memory.write_u8(physical, value)?)),
            None => Ok(Access::Blocked(reference)),
        }
    }

    /// Pins the page's frame for device I/O, faulting the page in first if
    /// needed.
    pub fn lock(&mut self, page: PageRef, thread: ThreadId) -> Result<LockState, VmError> {
        if !self.scheduler.contains(thread) {
            return Err(VmError::NoSuchThread(thread));
        }
        let entry = self.page(page).ok_or(VmError::NoSuchPage(page))?;
        let (valid, in_flight) = (entry.is_valid(), entry.validating_thread());
        if self.scheduler.is_killed(thread) {
            return Ok(LockState::Failed);
        }

        if valid {
            return self.pin(page);
        }
        // a page mid-fault is never pinned, even by its own faulting thread
        if in_flight.is_some() {
            self.park(page, Waiter::Lock { thread });
            return Ok(LockState::Pending);
        }
        match self.handle_page_fault(thread, ReferenceKind::Lock, page)? {
            FaultProgress::Suspended(_) => Ok(LockState::Pending),
            FaultProgress::Resolved(FaultOutcome::Success) => self.pin(page),
            FaultProgress::Resolved(_) => Ok(LockState::Failed),
        }
    }

    /// Suspends the waiter's thread on the page until the fault in flight
    /// concludes.
    fn park(&mut self, page: PageRef, waiter: Waiter) {
        let thread = waiter.thread();
        if let Some(entry) = self.page_mut(page) {
            entry.waiters.push(waiter);
        }
        self.scheduler.suspend(thread);
        debug!("{} waits on {} for a fault in flight", thread, page);
    }

    fn pin(&mut self, page: PageRef) -> Result<LockState, VmError> {
        let frame = self.page(page).and_then(|entry| entry.frame());
        match frame.and_then(|frame| self.frames.get_mut(frame)) {
            Some(frame) => {
                frame.increment_lock_count();
                debug!("Frame {} locked ({})", frame.id(), frame.lock_count());
                Ok(LockState::Acquired)
            }
            None => Ok(LockState::Failed),
        }
    }

    /// Drops one pin. Unlocking an unpinned frame does nothing.
    pub fn unlock(&mut self, page: PageRef) -> Result<(), VmError> {
        let frame = self
            .page(page)
            .ok_or(VmError::NoSuchPage(page))?
            .frame();
        if let Some(frame) = frame.and_then(|frame| self.frames.get_mut(frame)) {
            frame.decrement_lock_count();
            debug!("Frame {} unlocked ({})", frame.id(), frame.lock_count());
        }
        Ok(())
    }
}
