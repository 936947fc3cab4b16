//! Backing store for swapped-out pages. Each task owns a swap area
//! addressed by page number.

use std::collections::{hash_map::Entry, HashMap};

use disk::{Disk, DiskError};
use log::{debug, info};
use thiserror::Error;

use crate::common::{PageNumber, PageRef, TaskId};

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("swap device failed: {0}")]
    Disk(#[from] DiskError),
    #[error("swap store rejected {0}")]
    Rejected(PageRef),
}

pub trait BackingStore {
    fn write(&mut self, task: TaskId, page: PageNumber, data: &[u8]) -> Result<(), SwapError>;

    fn read(&mut self, task: TaskId, page: PageNumber, buf: &mut [u8]) -> Result<(), SwapError>;

    /// Drops the swap area of a task that exited.
    fn release(&mut self, _task: TaskId) -> Result<(), SwapError> {
        Ok(())
    }

    /// Block size the store is fixed to, if any.
    fn block_size(&self) -> Option<usize> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOp {
    Read(PageRef),
    Write(PageRef),
}

/// In-memory store that logs every transfer in order. Pages never written
/// read back as zeroes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pages: HashMap<PageRef, Vec<u8>>,
    ops: Vec<SwapOp>,
    fail_next: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[SwapOp] {
        &self.ops
    }

    pub fn contents(&self, page: PageRef) -> Option<&[u8]> {
        self.pages.get(&page).map(Vec::as_slice)
    }

    /// Makes the next transfer fail.
    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }

    fn check_failure(&mut self, page: PageRef) -> Result<(), SwapError> {
        if std::mem::take(&mut self.fail_next) {
            return Err(SwapError::Rejected(page));
        }
        Ok(())
    }
}

impl BackingStore for MemoryStore {
    fn write(&mut self, task: TaskId, page: PageNumber, data: &[u8]) -> Result<(), SwapError> {
        let page = PageRef::new(task, page);
        self.ops.push(SwapOp::Write(page));
        self.check_failure(page)?;
        self.pages.insert(page, data.to_vec());
        Ok(())
    }

    fn read(&mut self, task: TaskId, page: PageNumber, buf: &mut [u8]) -> Result<(), SwapError> {
        let page = PageRef::new(task, page);
        self.ops.push(SwapOp::Read(page));
        self.check_failure(page)?;
        match self.pages.get(&page) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn release(&mut self, task: TaskId) -> Result<(), SwapError> {
        self.pages.retain(|page, _| page.task != task);
        Ok(())
    }
}

/// One swap file per task, created on first use and removed when the task
/// exits.
#[derive(Debug)]
pub struct DiskStore<const PAGE_SIZE: usize, const CAPACITY: usize> {
    prefix: String,
    disks: HashMap<TaskId, Disk<PAGE_SIZE, CAPACITY>>,
}

impl<const PAGE_SIZE: usize, const CAPACITY: usize> DiskStore<PAGE_SIZE, CAPACITY> {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            disks: HashMap::new(),
        }
    }

    pub fn swap_name(&self, task: TaskId) -> String {
        format!("{}_task{}", self.prefix, task.0)
    }

    fn disk(&mut self, task: TaskId) -> Result<&mut Disk<PAGE_SIZE, CAPACITY>, SwapError> {
        let name = self.swap_name(task);
        match self.disks.entry(task) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let disk = Disk::create(&name)?;
                info!("Swap file for {} created", task);
                Ok(entry.insert(disk))
            }
        }
    }
}

impl<const PAGE_SIZE: usize, const CAPACITY: usize> BackingStore for DiskStore<PAGE_SIZE, CAPACITY> {
    fn write(&mut self, task: TaskId, page: PageNumber, data: &[u8]) -> Result<(), SwapError> {
        self.disk(task)?.write_block(page, data)?;
        debug!("Swapped out task {} page {}", task.0, page);
        Ok(())
    }

    fn read(&mut self, task: TaskId, page: PageNumber, buf: &mut [u8]) -> Result<(), SwapError> {
        self.disk(task)?.read_block(page, buf)?;
        debug!("Swapped in task {} page {}", task.0, page);
        Ok(())
    }

    fn release(&mut self, task: TaskId) -> Result<(), SwapError> {
        if let Some(disk) = self.disks.remove(&task) {
            disk.remove()?;
        }
        Ok(())
    }

    fn block_size(&self) -> Option<usize> {
        Some(PAGE_SIZE)
    }
}

impl<const PAGE_SIZE: usize, const CAPACITY: usize> Drop for DiskStore<PAGE_SIZE, CAPACITY> {
    fn drop(&mut self) {
        for (_, disk) in self.disks.drain() {
            let _ = disk.remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn memory_store_records_transfers_in_order() {
        let mut store = MemoryStore::new();
        let mut buf = [0xaa; 4];
        store.read(TaskId(1), 2, &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
        store.write(TaskId(1), 2, &[1, 2, 3, 4]).unwrap();
        store.read(TaskId(1), 2, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        let page = PageRef::new(TaskId(1), 2);
        assert_eq!(
            store.ops(),
            &[SwapOp::Read(page), SwapOp::Write(page), SwapOp::Read(page)]
        );
    }

    #[test]
    fn memory_store_failure_is_one_shot() {
        let mut store = MemoryStore::new();
        store.fail_next();
        assert!(store.write(TaskId(0), 0, &[1]).is_err());
        assert!(store.write(TaskId(0), 0, &[1]).is_ok());
        assert_eq!(store.contents(PageRef::new(TaskId(0), 0)), Some(&[1u8][..]));
    }

    #[test]
    fn memory_store_release_drops_task_pages() {
        let mut store = MemoryStore::new();
        store.write(TaskId(0), 0, &[1]).unwrap();
        store.write(TaskId(1), 0, &[2]).unwrap();
        store.release(TaskId(0)).unwrap();
        assert!(store.contents(PageRef::new(TaskId(0), 0)).is_none());
        assert!(store.contents(PageRef::new(TaskId(1), 0)).is_some());
    }

    #[test]
    #[serial]
    fn disk_store_round_trips_a_page() {
        let mut store = DiskStore::<64, { 64 * 8 }>::new("swap-unit");
        let data = [7u8; 64];
        store.write(TaskId(4), 5, &data).unwrap();
        let mut buf = [0u8; 64];
        store.read(TaskId(4), 5, &mut buf).unwrap();
        assert_eq!(buf, data);
        let name = disk::swap_file_name(&store.swap_name(TaskId(4)));
        store.release(TaskId(4)).unwrap();
        assert!(!std::path::Path::new(&name).exists());
    }

    #[test]
    #[serial]
    fn disk_store_rejects_pages_past_capacity() {
        let mut store = DiskStore::<64, { 64 * 2 }>::new("swap-unit-small");
        let mut buf = [0u8; 64];
        assert!(matches!(
            store.read(TaskId(0), 2, &mut buf),
            Err(SwapError::Disk(DiskError::OverCapacity(2)))
        ));
    }
}
