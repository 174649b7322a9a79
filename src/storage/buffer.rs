//! Write-through buffer layer over a block device
//!
//! The swap engine moves pages through `acquire` / `write` / drop. There is
//! no caching: `acquire` reads the block from the device and `write` goes
//! straight back to it, so a buffer's contents are durable as soon as
//! `write` returns. The page-out path relies on this - the PTE rewrite is
//! ordered after the last block write, and write-through makes that write
//! durable.

use alloc::sync::Arc;

use super::blkdev::{BlockDevice, BlockError, BLOCK_SIZE};

/// An in-memory copy of one disk block
///
/// Obtained from [`BufferCache::acquire`]; released by dropping it. Mutate
/// `data` freely, then push the result back with [`BufferCache::write`].
pub struct Buf {
    blockno: u32,
    pub data: [u8; BLOCK_SIZE],
}

impl Buf {
    /// Block number this buffer holds
    pub fn blockno(&self) -> u32 {
        self.blockno
    }
}

/// Buffer layer bound to one block device
pub struct BufferCache {
    dev: Arc<dyn BlockDevice>,
}

impl BufferCache {
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        Self { dev }
    }

    /// Read `blockno` from the device into a fresh buffer
    pub fn acquire(&self, blockno: u32) -> Result<Buf, BlockError> {
        let mut buf = Buf {
            blockno,
            data: [0; BLOCK_SIZE],
        };
        self.dev.read_block(blockno, &mut buf.data)?;
        Ok(buf)
    }

    /// Write the buffer back to its block on the device
    pub fn write(&self, buf: &Buf) -> Result<(), BlockError> {
        self.dev.write_block(buf.blockno, &buf.data)
    }
}
