use std::{mem::size_of, ops::Range};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address {0:#x} is past the end of physical memory")]
    OverCapacity(u64),
    #[error("frame {0} does not exist")]
    NoSuchFrame(usize),
}

/// Simulated physical memory, carved into `frame_count` frames of
/// `frame_size` bytes each.
#[derive(Debug, Clone)]
pub struct PhysicalMemory {
    frame_size: usize,
    buffer: Vec<u8>,
}

impl PhysicalMemory {
    pub fn init(frame_count: usize, frame_size: usize) -> Self {
        assert!(
            frame_size.is_power_of_two(),
            "Frame size {} is not a power of 2",
            frame_size
        );
        Self {
            frame_size,
            buffer: vec![0; frame_count * frame_size],
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frame_count(&self) -> usize {
        self.buffer.len() / self.frame_size
    }

    fn frame_range(&self, frame: usize) -> Result<Range<usize>, MemoryError> {
        if frame >= self.frame_count() {
            return Err(MemoryError::NoSuchFrame(frame));
        }
        Ok(frame * self.frame_size..(frame + 1) * self.frame_size)
    }

    pub fn frame(&self, frame: usize) -> Result<&[u8], MemoryError> {
        let range = self.frame_range(frame)?;
        Ok(&self.buffer[range])
    }

    pub fn frame_mut(&mut self, frame: usize) -> Result<&mut [u8], MemoryError> {
        let range = self.frame_range(frame)?;
        Ok(&mut self.buffer[range])
    }

    pub fn zero_frame(&mut self, frame: usize) -> Result<(), MemoryError> {
        self.frame_mut(frame)?.fill(0);
        Ok(())
    }

    fn check_range(&self, address: u64, len: usize) -> Result<Range<usize>, MemoryError> {
        let start = address as usize;
        if start + len > self.buffer.len() {
            return Err(MemoryError::OverCapacity(address));
        }
        Ok(start..start + len)
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, MemoryError> {
        let range = self.check_range(address, 1)?;
        Ok(self.buffer[range.start])
    }

    pub fn write_u8(&mut self, address: u64, byte: u8) -> Result<(), MemoryError> {
        let range = self.check_range(address, 1)?;
        self.buffer[range.start] = byte;
        Ok(())
    }

    pub fn read_u32(&self, address: u64) -> Result<u32, MemoryError> {
        let range = self.check_range(address, size_of::<u32>())?;
        let mut bytes = [0; size_of::<u32>()];
        bytes.copy_from_slice(&self.buffer[range]);
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn write_u32(&mut self, address: u64, word: u32) -> Result<(), MemoryError> {
        let range = self.check_range(address, size_of::<u32>())?;
        self.buffer[range].copy_from_slice(&word.to_be_bytes());
        Ok(())
    }
}
