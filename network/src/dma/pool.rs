//! Receive buffers backed by the shared [`dma_pool`] allocator.
//!
//! A `PoolBuffer` already knows its bus address, so mapping one is just
//! reading that address back. Ownership hooks drive the pool's
//! Free/DriverOwned/DeviceOwned tracking.

use dma_pool::PoolBuffer;

use crate::dma::DmaMapping;
use crate::types::RxBuffer;

impl RxBuffer for PoolBuffer {
    fn capacity(&self) -> usize {
        PoolBuffer::capacity(self)
    }

    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }

    fn on_post(&mut self) {
        self.mark_device_owned();
    }

    fn on_reclaim(&mut self) {
        self.mark_driver_owned();
    }
}

/// Identity mapping for a pool buffer.
pub fn map_pool_buffer(buffer: &PoolBuffer) -> DmaMapping {
    DmaMapping::single(
        buffer.bus_addr(),
        PoolBuffer::capacity(buffer) as u32,
        buffer.index() as u64,
    )
}
