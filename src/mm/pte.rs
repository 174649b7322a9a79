//! Page-table entry encoding
//!
//! A PTE is a 32-bit word: bits 0-11 are protection flags, bits 12-31 hold
//! a frame number while the page is resident. When a page is swapped out,
//! the present bit is cleared and bits 12-31 are reused for the swap-slot
//! index, with the remaining protection flags preserved so the mapping can
//! be reconstructed on page-in.
//!
//! ## PTE format for a swapped page
//!
//! ```text
//! Bit 0:      0 (not present)
//! Bits 1-11:  saved protection flags
//! Bits 12-31: swap-slot index
//! ```
//!
//! A PTE of exactly zero means "unmapped" - never "swapped into slot 0".
//! A swapped PTE is always non-zero because an evicted page was
//! user-accessible, so at least the USER bit survives in the saved flags.

use core::fmt;

use bitflags::bitflags;

use crate::mm::PhysAddr;

bitflags! {
    /// x86 page-table entry flag bits (low 12 bits of a PTE)
    ///
    /// Bits not named here are opaque to the engine and round-trip through
    /// eviction untouched (`from_bits_retain` keeps them).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
    }
}

/// Mask of the flag bits within a PTE
const FLAG_MASK: u32 = 0xFFF;

/// A 32-bit page-table entry
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Pte(u32);

impl Pte {
    /// The unmapped entry
    #[inline]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Build a resident entry: frame number plus flags
    #[inline]
    pub fn new_frame(pa: PhysAddr, flags: PteFlags) -> Self {
        Self((pa & !FLAG_MASK) | (flags.bits() & FLAG_MASK))
    }

    /// Build a swapped entry: slot index in the address bits, saved flags
    /// below, present bit forced clear
    #[inline]
    pub fn new_swap(slot: usize, saved: PteFlags) -> Self {
        debug_assert!(slot < (1 << 20));
        Self(((slot as u32) << 12) | (saved.bits() & FLAG_MASK & !PteFlags::PRESENT.bits()))
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_present(self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    /// Non-zero with the present bit clear: the entry encodes a swap slot
    #[inline]
    pub fn is_swapped(self) -> bool {
        !self.is_zero() && !self.is_present()
    }

    #[inline]
    pub fn is_user(self) -> bool {
        self.flags().contains(PteFlags::USER)
    }

    #[inline]
    pub fn is_accessed(self) -> bool {
        self.flags().contains(PteFlags::ACCESSED)
    }

    /// All 12 flag bits, named and opaque alike
    #[inline]
    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_retain(self.0 & FLAG_MASK)
    }

    /// Physical frame address (valid only while present)
    #[inline]
    pub fn frame_addr(self) -> PhysAddr {
        self.0 & !FLAG_MASK
    }

    /// Swap-slot index (valid only while swapped)
    #[inline]
    pub fn slot_index(self) -> usize {
        (self.0 >> 12) as usize
    }

    /// Clear the accessed bit (the second-chance sweep)
    #[inline]
    pub fn clear_accessed(&mut self) {
        self.0 &= !PteFlags::ACCESSED.bits();
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "Pte(unmapped)")
        } else if self.is_present() {
            write!(
                f,
                "Pte(frame={:#x}, flags={:#05x})",
                self.frame_addr(),
                self.flags().bits()
            )
        } else {
            write!(
                f,
                "Pte(slot={}, flags={:#05x})",
                self.slot_index(),
                self.flags().bits()
            )
        }
    }
}
