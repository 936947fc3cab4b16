use crate::{
    common::{FrameId, ReferenceKind, ThreadId},
    scheduler::WaitQueue,
};

/// A thread parked on a page while someone else's fault brings it in,
/// together with what it was trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waiter {
    Refer { thread: ThreadId, kind: ReferenceKind },
    Lock { thread: ThreadId },
}

impl Waiter {
    pub fn thread(&self) -> ThreadId {
        match *self {
            Waiter::Refer { thread, .. } | Waiter::Lock { thread } => thread,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageTableEntry {
    pub(crate) frame: Option<FrameId>,
    pub(crate) valid: bool,
    /// Thread currently resolving a fault on this page. At most one fault
    /// per page is in flight.
    pub(crate) validating_thread: Option<ThreadId>,
    pub(crate) waiters: WaitQueue<Waiter>,
}

impl PageTableEntry {
    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn validating_thread(&self) -> Option<ThreadId> {
        self.validating_thread
    }

    pub fn waiters(&self) -> &WaitQueue<Waiter> {
        &self.waiters
    }

    /// Detaches the page from its frame after eviction.
    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
        self.frame = None;
    }
}
