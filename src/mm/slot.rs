//! Swap-slot table
//!
//! The backing store is carved into 800 slots of 8 contiguous 512-byte
//! blocks, one page each, starting after the two reserved boot/superblock
//! blocks. Free/allocated state lives only in this table; there is no
//! on-disk header, so a reboot forgets everything - which is exactly right
//! for anonymous memory.
//!
//! A slot is either free (its disk region may hold stale bytes) or
//! allocated (its region holds the bytes of exactly one evicted page, and
//! `page_perm` holds the low 12 PTE bits captured at eviction).

use crate::mm::pte::PteFlags;

/// Number of swap slots on the device
pub const SWAP_SLOTS: usize = 800;

/// First block of the swap region (blocks 0-1 are boot + superblock)
pub const SWAP_START_BLOCK: u32 = 2;

/// Blocks per page-sized slot
pub const BLOCKS_PER_PAGE: u32 = 8;

/// First disk block of slot `index`
#[inline]
pub fn slot_base_block(index: usize) -> u32 {
    SWAP_START_BLOCK + index as u32 * BLOCKS_PER_PAGE
}

#[derive(Clone, Copy)]
struct SwapSlot {
    /// Protection bits of the swapped page, captured at eviction
    page_perm: PteFlags,
    is_free: bool,
}

/// The fixed pool of swap slots
///
/// Callers wrap this in a spin lock and hold it for each whole operation;
/// none of the methods acquire other locks or sleep.
pub struct SlotTable {
    slots: [SwapSlot; SWAP_SLOTS],
    allocated: usize,
}

impl SlotTable {
    /// All slots free
    pub const fn new() -> Self {
        Self {
            slots: [SwapSlot {
                page_perm: PteFlags::empty(),
                is_free: true,
            }; SWAP_SLOTS],
            allocated: 0,
        }
    }

    /// First-fit allocation: mark the lowest free slot allocated and
    /// return its index, or `None` when the table is exhausted
    pub fn allocate(&mut self) -> Option<usize> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_free {
                slot.is_free = false;
                self.allocated += 1;
                return Some(index);
            }
        }
        None
    }

    /// Free a slot and clear its saved permissions
    ///
    /// Idempotent; out-of-range indices are ignored.
    pub fn free(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if !slot.is_free {
                slot.is_free = true;
                slot.page_perm = PteFlags::empty();
                self.allocated -= 1;
            }
        }
    }

    /// Whether `index` names an allocated slot (out of range counts as no)
    pub fn is_allocated(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .map(|slot| !slot.is_free)
            .unwrap_or(false)
    }

    /// Saved permissions of an allocated slot
    pub fn perm(&self, index: usize) -> Option<PteFlags> {
        let slot = self.slots.get(index)?;
        if slot.is_free {
            return None;
        }
        Some(slot.page_perm)
    }

    /// Record the permissions captured at eviction
    pub fn set_perm(&mut self, index: usize, perm: PteFlags) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.page_perm = perm;
        }
    }

    /// Number of slots currently allocated
    pub fn allocated_count(&self) -> usize {
        self.allocated
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}
