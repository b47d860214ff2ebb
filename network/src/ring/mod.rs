//! Descriptor ring storage.
//!
//! A ring is two parallel arrays of the same length: the device-visible
//! descriptors and the software slots that remember what each descriptor
//! refers to. Cursors live with the queue that drives the ring, since TX
//! and RX move them differently.

pub mod slot;

pub use slot::{RxChain, RxSlot, TxSlot};

use alloc::boxed::Box;
use alloc::vec::Vec;

/// Descriptors plus per-slot bookkeeping.
pub struct DescriptorRing<D, S> {
    /// Device-visible descriptors.
    descriptors: Box<[D]>,
    /// Software state, one per descriptor.
    slots: Box<[S]>,
}

impl<D, S> DescriptorRing<D, S> {
    /// Build a ring of `size` entries.
    pub fn new(size: u16, mut descriptor: impl FnMut() -> D, mut slot: impl FnMut() -> S) -> Self {
        let n = size as usize;
        let descriptors: Vec<D> = (0..n).map(|_| descriptor()).collect();
        let slots: Vec<S> = (0..n).map(|_| slot()).collect();
        Self {
            descriptors: descriptors.into_boxed_slice(),
            slots: slots.into_boxed_slice(),
        }
    }

    /// Number of entries.
    #[inline]
    pub fn size(&self) -> u16 {
        self.descriptors.len() as u16
    }

    /// Index after `i`, wrapping.
    #[inline]
    pub fn next(&self, i: u16) -> u16 {
        if i + 1 == self.size() {
            0
        } else {
            i + 1
        }
    }

    /// Index before `i`, wrapping.
    #[inline]
    pub fn prev(&self, i: u16) -> u16 {
        if i == 0 {
            self.size() - 1
        } else {
            i - 1
        }
    }

    /// Entries from `from` up to (not including) `to`.
    #[inline]
    pub fn distance(&self, from: u16, to: u16) -> u16 {
        if to >= from {
            to - from
        } else {
            self.size() - from + to
        }
    }

    #[inline]
    pub fn desc(&self, i: u16) -> &D {
        &self.descriptors[i as usize]
    }

    #[inline]
    pub fn desc_mut(&mut self, i: u16) -> &mut D {
        &mut self.descriptors[i as usize]
    }

    #[inline]
    pub fn slot(&self, i: u16) -> &S {
        &self.slots[i as usize]
    }

    #[inline]
    pub fn slot_mut(&mut self, i: u16) -> &mut S {
        &mut self.slots[i as usize]
    }

    /// Descriptor and slot together.
    #[inline]
    pub fn entry_mut(&mut self, i: u16) -> (&mut D, &mut S) {
        (&mut self.descriptors[i as usize], &mut self.slots[i as usize])
    }

    /// All slots.
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut S> {
        self.slots.iter_mut()
    }

    /// Base address of the descriptor array, for programming the device.
    pub fn base_ptr(&self) -> *const D {
        self.descriptors.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_arithmetic() {
        let ring: DescriptorRing<u64, ()> = DescriptorRing::new(8, || 0, || ());
        assert_eq!(ring.size(), 8);
        assert_eq!(ring.next(7), 0);
        assert_eq!(ring.next(3), 4);
        assert_eq!(ring.prev(0), 7);
        assert_eq!(ring.distance(6, 2), 4);
        assert_eq!(ring.distance(2, 2), 0);
        assert_eq!(ring.distance(1, 5), 4);
    }
}
