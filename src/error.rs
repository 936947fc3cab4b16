use thiserror::Error;

use crate::common::{IoId, PageRef, TaskId, ThreadId};

/// Misuse of the memory manager API. Fault outcomes are not errors and are
/// reported through [`FaultOutcome`] instead.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0} does not exist")]
    NoSuchTask(TaskId),
    #[error("{0} does not exist")]
    NoSuchThread(ThreadId),
    #[error("{0} does not exist")]
    NoSuchPage(PageRef),
    #[error("address {address:#x} is outside the {size:#x} byte address space")]
    AddressOutOfRange { address: u64, size: u64 },
    #[error("no {0} is pending")]
    NoSuchIo(IoId),
    #[error("frame and page tables disagree: {0}")]
    Inconsistent(String),
    #[error("physical memory access failed: {0}")]
    Memory(#[from] memory::MemoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    Success,
    /// The faulting thread was killed mid-fault, or the page was already valid.
    Failure,
    /// No frame could be freed or evicted. Not retried here.
    NotEnoughMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Success,
    Failure,
}
