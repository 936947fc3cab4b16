use log::{debug, error};

use super::MemoryManager;
use crate::{
    common::{FaultId, FrameId, IoId, PageRef, ThreadId},
    error::VmError,
    swap::{BackingStore, SwapError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    /// Write the frame's contents to the swap area of `page`.
    SwapOut,
    /// Fill the frame from the swap area of `page`.
    SwapIn,
}

/// A swap transfer issued by a fault and not yet completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRequest {
    pub id: IoId,
    pub fault: FaultId,
    pub thread: ThreadId,
    pub op: IoOp,
    pub page: PageRef,
    pub frame: FrameId,
}

impl<S: BackingStore> MemoryManager<S> {
    pub(super) fn submit_io(
        &mut self,
        fault: FaultId,
        thread: ThreadId,
        op: IoOp,
        page: PageRef,
        frame: FrameId,
    ) -> IoId {
        let id = IoId(self.next_io);
        self.next_io += 1;
        debug!("Submitted {}: {:?} {} via frame {}", id, op, page, frame);
        self.io_queue.push_back(IoRequest {
            id,
            fault,
            thread,
            op,
            page,
            frame,
        });
        id
    }

    pub fn pending_io(&self) -> impl Iterator<Item = &IoRequest> {
        self.io_queue.iter()
    }

    /// Completes one outstanding transfer, in any order the caller likes,
    /// and resumes the fault that issued it.
    ///
    /// The bytes only move if the issuing thread is still alive. A failing
    /// backing store kills the thread, and the fault then unwinds as for
    /// any other kill.
    pub fn complete_io(&mut self, id: IoId) -> Result<(), VmError> {
        let position = self
            .io_queue
            .iter()
            .position(|request| request.id == id)
            .ok_or(VmError::NoSuchIo(id))?;
        let Some(request) = self.io_queue.remove(position) else {
            return Err(VmError::NoSuchIo(id));
        };
        debug!("Completing {}: {:?} {}", id, request.op, request.page);

        if !self.scheduler.is_killed(request.thread) {
            if let Err(e) = self.transfer(&request) {
                error!(
                    "{} of {} failed, killing {}: {}",
                    id, request.page, request.thread, e
                );
                self.scheduler.kill(request.thread);
            }
        }
        self.resume_fault(request.fault);
        Ok(())
    }

    /// Completes the oldest outstanding transfer.
    pub fn complete_next_io(&mut self) -> Result<Option<IoId>, VmError> {
        let Some(id) = self.io_queue.front().map(|request| request.id) else {
            return Ok(None);
        };
        self.complete_io(id)?;
        Ok(Some(id))
    }

    /// Runs transfers until none are left, including the swap-ins that
    /// finished swap-outs queue up. Returns how many completed.
    pub fn complete_all_io(&mut self) -> Result<usize, VmError> {
        let mut completed = 0;
        while self.complete_next_io()?.is_some() {
            completed += 1;
        }
        Ok(completed)
    }

    fn transfer(&mut self, request: &IoRequest) -> Result<(), SwapError> {
        let page = request.page;
        match request.op {
            IoOp::SwapOut => {
                let still_mapped = self
                    .frames
                    .get(request.frame)
                    .and_then(|frame| frame.occupant())
                    == Some(page);
                if !still_mapped {
                    debug!("{} left frame {} before write-back", page, request.frame);
                    return Ok(());
                }
                let data = self
                    .memory
                    .frame(request.frame)
                    .map_err(|_| SwapError::Rejected(page))?;
                self.store.write(page.task, page.page, data)
            }
            IoOp::SwapIn => {
                let buf = self
                    .memory
                    .frame_mut(request.frame)
                    .map_err(|_| SwapError::Rejected(page))?;
                self.store.read(page.task, page.page, buf)
            }
        }
    }
}
