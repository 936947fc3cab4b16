use std::{
    fs::{remove_file, File},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::PathBuf,
};

use log::{debug, info};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("block must be exactly {expected} bytes, got {actual}")]
    IncorrectBlockSize { expected: usize, actual: usize },
    #[error("block {0} is past the end of the device")]
    OverCapacity(usize),
    #[error("swap file header does not match: block size {block_size}, capacity {capacity}")]
    HeaderMismatch { block_size: u32, capacity: u32 },
    #[error("swap file i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

const HEADER_SIZE: usize = size_of::<u32>() * 2;

/// A swap device: `CAPACITY / BLOCKSIZE` fixed-size blocks stored in one file
/// behind a small header recording the geometry.
#[derive(Debug)]
pub struct Disk<const BLOCKSIZE: usize, const CAPACITY: usize> {
    path: PathBuf,
    file: File,
}

pub fn swap_file_name(name: &str) -> String {
    let name = name.replace('-', "_");
    let mut file_name = String::from("SWAP_FILE_");
    file_name.push_str(&name);
    file_name
}

fn write_header(file: &mut File, block_size: u32, capacity: u32) -> Result<(), std::io::Error> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&block_size.to_be_bytes())?;
    file.write_all(&capacity.to_be_bytes())?;
    Ok(())
}

fn read_header(file: &mut File) -> Result<(u32, u32), std::io::Error> {
    let mut block_size = [0; size_of::<u32>()];
    let mut capacity = [0; size_of::<u32>()];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut block_size)?;
    file.read_exact(&mut capacity)?;
    Ok((u32::from_be_bytes(block_size), u32::from_be_bytes(capacity)))
}

impl<const BLOCKSIZE: usize, const CAPACITY: usize> Disk<BLOCKSIZE, CAPACITY> {
    pub const BLOCKS: usize = CAPACITY / BLOCKSIZE;

    /// Creates (or truncates) the swap file for `name`. Every block reads back
    /// as zeroes until it is first written.
    pub fn create(name: &str) -> Result<Self, DiskError> {
        assert_eq!(
            CAPACITY % BLOCKSIZE,
            0,
            "Capacity must be a multiple of BlockSize"
        );
        let path = PathBuf::from(swap_file_name(name));
        let mut file = File::options()
            .truncate(true)
            .write(true)
            .read(true)
            .create(true)
            .open(&path)?;
        file.set_len((HEADER_SIZE + CAPACITY) as u64)?;
        write_header(&mut file, BLOCKSIZE as u32, CAPACITY as u32)?;
        info!("Created swap file {} ({} blocks)", path.display(), Self::BLOCKS);
        Ok(Self { path, file })
    }

    pub fn connect(name: &str) -> Result<Self, DiskError> {
        let path = PathBuf::from(swap_file_name(name));
        let mut file = File::options().write(true).read(true).open(&path)?;
        let (block_size, capacity) = read_header(&mut file)?;
        if block_size as usize != BLOCKSIZE || capacity as usize != CAPACITY {
            return Err(DiskError::HeaderMismatch {
                block_size,
                capacity,
            });
        }
        Ok(Self { path, file })
    }

    fn seek_block(&mut self, block_number: usize) -> Result<(), DiskError> {
        if block_number >= Self::BLOCKS {
            return Err(DiskError::OverCapacity(block_number));
        }
        self.file.seek(SeekFrom::Start(
            (HEADER_SIZE + block_number * BLOCKSIZE) as u64,
        ))?;
        Ok(())
    }

    pub fn read_block(&mut self, block_number: usize, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize {
                expected: BLOCKSIZE,
                actual: buf.len(),
            });
        }
        self.seek_block(block_number)?;
        self.file.read_exact(buf)?;
        debug!("Read block[{}] from {}", block_number, self.path.display());
        Ok(())
    }

    pub fn write_block(&mut self, block_number: usize, block: &[u8]) -> Result<(), DiskError> {
        if block.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize {
                expected: BLOCKSIZE,
                actual: block.len(),
            });
        }
        self.seek_block(block_number)?;
        self.file.write_all(block)?;
        debug!("Wrote block[{}] to {}", block_number, self.path.display());
        Ok(())
    }

    /// Deletes the swap file. Swap contents never outlive the task that owns them.
    pub fn remove(self) -> Result<(), DiskError> {
        let Self { path, file } = self;
        drop(file);
        remove_file(&path)?;
        info!("Removed swap file {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_create_and_remove() {
        let disk = Disk::<512, 1024>::create("test_create").unwrap();
        assert!(std::path::Path::new(&swap_file_name("test_create")).exists());
        disk.remove().unwrap();
        assert!(!std::path::Path::new(&swap_file_name("test_create")).exists());
    }

    #[test]
    #[serial]
    fn test_connect() {
        let disk = Disk::<512, 1024>::create("test_connect").unwrap();
        let mut block = [0; 512];
        block[3] = 9;
        let mut disk_again = Disk::<512, 1024>::connect("test_connect").unwrap();
        drop(disk);
        disk_again.write_block(1, &block).unwrap();
        let mut read = [0; 512];
        disk_again.read_block(1, &mut read).unwrap();
        assert_eq!(read[3], 9);
        disk_again.remove().unwrap();
    }

    #[test]
    #[serial]
    fn test_connect_with_wrong_geometry() {
        let disk = Disk::<512, 1024>::create("test_wrong_geometry").unwrap();
        let err = Disk::<256, 1024>::connect("test_wrong_geometry").unwrap_err();
        assert!(matches!(
            err,
            DiskError::HeaderMismatch {
                block_size: 512,
                capacity: 1024
            }
        ));
        disk.remove().unwrap();
    }

    #[test]
    #[serial]
    fn test_fresh_blocks_are_zeroed() {
        let mut disk = Disk::<512, 2048>::create("test_fresh_blocks").unwrap();
        let mut buf = [0xff; 512];
        disk.read_block(3, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
        disk.remove().unwrap();
    }

    #[test]
    #[serial]
    fn test_read_write_over_capacity() {
        let mut disk = Disk::<512, 1024>::create("test_over_capacity").unwrap();
        let block = [1; 512];
        assert!(matches!(
            disk.write_block(2, &block),
            Err(DiskError::OverCapacity(2))
        ));
        let mut buf = [0; 512];
        assert!(matches!(
            disk.read_block(2, &mut buf),
            Err(DiskError::OverCapacity(2))
        ));
        disk.remove().unwrap();
    }

    #[test]
    #[serial]
    fn test_incorrect_block_size() {
        let mut disk = Disk::<512, 1024>::create("test_block_size").unwrap();
        let short = [1; 256];
        assert!(matches!(
            disk.write_block(0, &short),
            Err(DiskError::IncorrectBlockSize {
                expected: 512,
                actual: 256
            })
        ));
        let mut long = [0; 1024];
        assert!(matches!(
            disk.read_block(0, &mut long),
            Err(DiskError::IncorrectBlockSize { .. })
        ));
        disk.remove().unwrap();
    }
}
