//! Software slot state.

use alloc::vec::Vec;

use dma_pool::BufferOwnership;

use crate::dma::DmaMapping;
use crate::types::RxFragment;

/// Bookkeeping for one transmit descriptor.
///
/// A multi-descriptor packet keeps its packet and mapping in the slot of
/// its last descriptor; the first slot records where that last one is.
pub struct TxSlot<P> {
    /// Packet, held until its EOP descriptor completes.
    pub packet: Option<P>,
    /// Mapping of `packet`.
    pub mapping: Option<DmaMapping>,
    /// On a packet's first slot: index of its last descriptor.
    pub eop: Option<u16>,
    /// Who owns the descriptor.
    pub owner: BufferOwnership,
}

impl<P> TxSlot<P> {
    /// Unused slot.
    pub fn empty() -> Self {
        Self {
            packet: None,
            mapping: None,
            eop: None,
            owner: BufferOwnership::Free,
        }
    }
}

/// Fragments of a packet still being received.
pub struct RxChain<B> {
    /// Buffers taken so far.
    pub fragments: Vec<RxFragment<B>>,
    /// Bytes so far.
    pub len: usize,
}

impl<B> RxChain<B> {
    pub fn new() -> Self {
        Self {
            fragments: Vec::new(),
            len: 0,
        }
    }

    /// Append one buffer.
    pub fn push(&mut self, buffer: B, len: usize) {
        self.fragments.push(RxFragment { buffer, len });
        self.len += len;
    }
}

impl<B> Default for RxChain<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bookkeeping for one receive descriptor.
pub struct RxSlot<B> {
    /// Buffer posted (or waiting to be posted) at this slot.
    pub buffer: Option<B>,
    /// Mapping of `buffer`.
    pub mapping: Option<DmaMapping>,
    /// `buffer` was left in place and only needs reposting.
    pub recycle: bool,
    /// Partial packet whose next fragment lands in this slot.
    pub chain: Option<RxChain<B>>,
    /// Who owns the descriptor.
    pub owner: BufferOwnership,
}

impl<B> RxSlot<B> {
    /// Unused slot.
    pub fn empty() -> Self {
        Self {
            buffer: None,
            mapping: None,
            recycle: false,
            chain: None,
            owner: BufferOwnership::Free,
        }
    }
}
