//! Storage stack
//!
//! Block device trait, the write-through buffer layer the swap engine
//! consumes, and a RAM disk driver for self-hosted testing.

pub mod blkdev;
pub mod buffer;
pub mod ramdisk;

pub use blkdev::{BlockDevice, BlockError, BLOCK_SIZE};
pub use buffer::{Buf, BufferCache};
pub use ramdisk::RamDisk;
