//! kswap - demand-paging swap subsystem for a small teaching kernel
//!
//! Extends a physical memory manager with a backing store on a block device
//! so that user processes may collectively address more anonymous memory
//! than the machine has RAM. The pieces:
//!
//! - [`mm::slot`]: a fixed pool of 800 on-disk swap slots, one page each
//! - [`mm::swap`]: the engine - page-out, page-in, fork-time slot
//!   duplication, exit-time teardown, and the eviction trigger
//! - [`mm::reclaim`]: victim selection (largest resident set, then lowest
//!   pid; second-chance page selection) and the adaptive low-watermark
//!   controller
//! - [`frame_alloc`]: bitmap physical frame allocator over a caller-owned
//!   RAM window
//! - [`mm::page_table`]: software-walked two-level 32-bit page tables with
//!   the dual PTE encoding (frame number when present, swap-slot index when
//!   swapped out)
//! - [`storage`]: block device trait, write-through buffer cache, RAM disk
//!
//! Only anonymous user pages are swappable. Slot free/allocated state is
//! in-memory only and is lost on reboot, consistent with anonymous-memory
//! semantics.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod frame_alloc;
pub mod mm;
pub mod printk;
pub mod storage;
pub mod task;

pub use error::{SwapError, SwapResult};
pub use frame_alloc::FrameAllocator;
pub use mm::swap::SwapArea;
pub use task::{Process, ProcessTable};

// printk! / printkln! macros are re-exported at crate root via #[macro_export]
