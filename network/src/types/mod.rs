//! Shared data types.
//!
//! Queue identifiers, segment lists, offload requests and the packet
//! traits the rings are generic over.

pub mod offload;
pub mod packet;

// Re-exports
pub use offload::{OffloadFlags, TxOffloadRequest};
pub use packet::{ChecksumStatus, RxBuffer, RxChecksum, RxFragment, RxPacket, TxPacket};

use core::fmt;

/// Hard cap on queues per engine (one bit each in a [`QueueMask`]).
pub const MAX_QUEUES: usize = 64;

/// Index of a queue pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub u16);

impl QueueId {
    /// Queue index as usize.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Which ring of a queue pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// Bitmask of queues, bit N for queue N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueMask(pub u64);

impl QueueMask {
    /// Empty mask.
    pub const NONE: QueueMask = QueueMask(0);

    /// Mask with only `queue` set.
    #[inline]
    pub fn single(queue: QueueId) -> Self {
        QueueMask(1u64 << queue.0)
    }

    /// Set `queue`.
    #[inline]
    pub fn insert(&mut self, queue: QueueId) {
        self.0 |= 1u64 << queue.0;
    }

    /// Whether `queue` is set.
    #[inline]
    pub fn contains(self, queue: QueueId) -> bool {
        self.0 & (1u64 << queue.0) != 0
    }

    /// Number of queues set.
    #[inline]
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// No queue set.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Lowest queue set, if any.
    #[inline]
    pub fn first(self) -> Option<QueueId> {
        if self.0 == 0 {
            None
        } else {
            Some(QueueId(self.0.trailing_zeros() as u16))
        }
    }
}

/// One device-visible address/length pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Bus address.
    pub addr: u64,
    /// Length in bytes.
    pub len: u32,
}
