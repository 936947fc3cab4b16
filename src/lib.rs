pub mod common;
pub mod config;
pub mod error;
pub mod frame_table;
pub mod interrupt;
pub mod page_table;
pub mod replacer;
pub mod scheduler;
pub mod swap;
pub mod vm;

pub use common::{FrameId, PageNumber, PageRef, ReferenceKind, TaskId, ThreadId};
pub use config::MemoryConfig;
pub use error::{FaultOutcome, LockOutcome, VmError};
pub use vm::{Access, LockState, MemoryManager, Reference, ReferenceStatus, Resolution};
