use std::collections::VecDeque;

use log::debug;

use crate::common::{PageRef, ReferenceKind, ThreadId};

/// A page fault raised by the translator and not yet handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRequest {
    pub kind: ReferenceKind,
    pub page: PageRef,
    pub thread: ThreadId,
}

/// Pending page-fault interrupts. Drained into the fault handler before the
/// faulting thread gets the CPU back.
#[derive(Debug, Default)]
pub struct InterruptVector {
    pending: VecDeque<FaultRequest>,
}

impl InterruptVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self, kind: ReferenceKind, page: PageRef, thread: ThreadId) {
        debug!("Page fault interrupt: {:?} of {} by {}", kind, page, thread);
        self.pending.push_back(FaultRequest { kind, page, thread });
    }

    pub fn take(&mut self) -> Option<FaultRequest> {
        self.pending.pop_front()
    }

    pub fn is_pending(&self, page: PageRef) -> bool {
        self.pending.iter().any(|r| r.page == page)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TaskId;

    #[test]
    fn requests_are_delivered_in_order() {
        let mut vector = InterruptVector::new();
        let a = PageRef::new(TaskId(0), 1);
        let b = PageRef::new(TaskId(0), 2);
        vector.raise(ReferenceKind::Read, a, ThreadId(0));
        vector.raise(ReferenceKind::Write, b, ThreadId(1));
        assert!(vector.is_pending(a));
        assert_eq!(vector.take().unwrap().page, a);
        assert_eq!(vector.take().unwrap().kind, ReferenceKind::Write);
        assert!(vector.take().is_none());
        assert!(vector.is_empty());
    }
}
