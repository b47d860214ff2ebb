//! DMA platform seam.
//!
//! The engine never touches an IOMMU or bounce buffer itself. It asks a
//! [`DmaPlatform`] to map packets and receive buffers and hands every
//! [`DmaMapping`] back through [`DmaPlatform::unmap`] exactly once: the
//! mapping type is not `Clone`, and `unmap` consumes it.

pub mod pool;

use alloc::vec::Vec;

use crate::error::MapError;
use crate::types::{RxBuffer, Segment, TxPacket};

/// A live mapping: the device-visible segments of one packet or buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct DmaMapping {
    segments: Vec<Segment>,
    token: u64,
}

impl DmaMapping {
    /// Wrap platform-produced segments. `token` is opaque to the engine.
    pub fn new(segments: Vec<Segment>, token: u64) -> Self {
        Self { segments, token }
    }

    /// Single-segment mapping.
    pub fn single(addr: u64, len: u32, token: u64) -> Self {
        let mut segments = Vec::with_capacity(1);
        segments.push(Segment { addr, len });
        Self { segments, token }
    }

    /// Device-visible segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// No segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Platform handle.
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Mapping and buffer services the engine relies on.
///
/// Every method is non-blocking. Allocation failure is a normal result,
/// never a wait.
pub trait DmaPlatform: Send + Sync {
    /// Outbound packet type.
    type Packet: TxPacket;
    /// Receive buffer type.
    type Buffer: RxBuffer;

    /// Map a packet for transmit.
    fn map_packet(&self, packet: &Self::Packet, max_segments: usize) -> Result<DmaMapping, MapError>;

    /// Rewrite a packet into fewer segments. On failure the packet comes
    /// back in the `Err`.
    fn coalesce(&self, packet: Self::Packet) -> Result<Self::Packet, Self::Packet>;

    /// Allocate a receive buffer of at least `size` bytes.
    fn alloc_buffer(&self, size: usize) -> Option<Self::Buffer>;

    /// Map a receive buffer for device writes.
    fn map_buffer(&self, buffer: &Self::Buffer) -> Result<DmaMapping, MapError>;

    /// Release a mapping.
    fn unmap(&self, mapping: DmaMapping);
}
