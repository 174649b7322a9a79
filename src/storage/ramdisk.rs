//! RAM disk driver
//!
//! A `Vec`-backed block device. Stands in for the swap partition in tests
//! and on machines without real storage; reads of never-written blocks
//! return zeros.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::blkdev::{BlockDevice, BlockError, BLOCK_SIZE};

/// Memory-backed block device
pub struct RamDisk {
    blocks: Mutex<Vec<u8>>,
    count: u32,
}

impl RamDisk {
    /// Create a RAM disk with `count` zeroed blocks
    pub fn new(count: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![0u8; count as usize * BLOCK_SIZE]),
            count,
        }
    }

    fn range(&self, blockno: u32) -> Result<core::ops::Range<usize>, BlockError> {
        if blockno >= self.count {
            return Err(BlockError::OutOfRange);
        }
        let start = blockno as usize * BLOCK_SIZE;
        Ok(start..start + BLOCK_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn block_count(&self) -> u32 {
        self.count
    }

    fn read_block(&self, blockno: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), BlockError> {
        let range = self.range(blockno)?;
        buf.copy_from_slice(&self.blocks.lock()[range]);
        Ok(())
    }

    fn write_block(&self, blockno: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), BlockError> {
        let range = self.range(blockno)?;
        self.blocks.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}
