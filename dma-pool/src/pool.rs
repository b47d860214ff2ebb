//! Fixed-size buffer pool over a [`DmaRegion`].
//!
//! The free list is a LIFO stack of buffer indices behind a spinlock.
//! Allocation pops, drop pushes. Nothing here ever blocks on memory.

use core::fmt;

use spin::Mutex;

use crate::ownership::BufferOwnership;
use crate::region::DmaRegion;

/// Upper bound on buffers per pool.
pub const MAX_POOL_SIZE: usize = 4096;

/// Pool construction errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Buffer size of zero.
    ZeroBufferSize,
    /// Region cannot hold even one buffer.
    RegionTooSmall {
        /// Region size in bytes.
        region: usize,
        /// Requested buffer size.
        buffer: usize,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::ZeroBufferSize => write!(f, "buffer size must be non-zero"),
            PoolError::RegionTooSmall { region, buffer } => write!(
                f,
                "region of {} bytes cannot hold a {} byte buffer",
                region, buffer
            ),
        }
    }
}

struct FreeList {
    stack: [u16; MAX_POOL_SIZE],
    len: usize,
    ownership: [BufferOwnership; MAX_POOL_SIZE],
}

/// Shared pool of equal-sized DMA buffers.
pub struct DmaPool {
    /// Backing memory.
    region: DmaRegion,
    /// Size of each buffer.
    buffer_size: usize,
    /// Number of buffers carved from the region.
    count: usize,
    /// Free indices plus per-buffer ownership.
    state: Mutex<FreeList>,
}

impl DmaPool {
    /// Carve `region` into `buffer_size` buffers.
    ///
    /// Buffers beyond [`MAX_POOL_SIZE`] are left unused.
    ///
    /// # Safety
    /// `region` must describe memory that stays valid and DMA-capable for
    /// as long as the pool or any buffer from it is alive.
    pub unsafe fn new(region: DmaRegion, buffer_size: usize) -> Result<Self, PoolError> {
        if buffer_size == 0 {
            return Err(PoolError::ZeroBufferSize);
        }
        let count = region.buffer_count(buffer_size).min(MAX_POOL_SIZE);
        if count == 0 {
            return Err(PoolError::RegionTooSmall {
                region: region.size,
                buffer: buffer_size,
            });
        }

        let mut free = FreeList {
            stack: [0; MAX_POOL_SIZE],
            len: count,
            ownership: [BufferOwnership::Free; MAX_POOL_SIZE],
        };
        // Lowest index on top so allocation order is predictable.
        for (slot, index) in free.stack[..count].iter_mut().zip((0..count).rev()) {
            *slot = index as u16;
        }

        log::debug!(
            "dma-pool: {} buffers of {} bytes at bus 0x{:x}",
            count,
            buffer_size,
            region.bus_addr
        );

        Ok(Self {
            region,
            buffer_size,
            count,
            state: Mutex::new(free),
        })
    }

    /// Take a buffer, or `None` if the pool is exhausted.
    pub fn try_alloc(&'static self) -> Option<PoolBuffer> {
        let mut state = self.state.lock();
        if state.len == 0 {
            return None;
        }
        state.len -= 1;
        let index = state.stack[state.len];
        debug_assert!(state.ownership[index as usize].is_free());
        state.ownership[index as usize] = BufferOwnership::DriverOwned;
        Some(PoolBuffer { pool: self, index })
    }

    /// Buffers currently in the free list.
    pub fn free_count(&self) -> usize {
        self.state.lock().len
    }

    /// Total buffers in the pool.
    pub fn capacity(&self) -> usize {
        self.count
    }

    /// Size of each buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn ownership(&self, index: u16) -> BufferOwnership {
        self.state.lock().ownership[index as usize]
    }

    fn transition(&self, index: u16, next: BufferOwnership) {
        let mut state = self.state.lock();
        let current = state.ownership[index as usize];
        debug_assert!(
            current.can_transition_to(next),
            "buffer {}: illegal transition {:?} -> {:?}",
            index,
            current,
            next
        );
        state.ownership[index as usize] = next;
    }

    fn release(&self, index: u16) {
        let mut state = self.state.lock();
        let current = state.ownership[index as usize];
        if current.is_device_owned() {
            log::debug!("dma-pool: reclaiming buffer {} still posted to device", index);
        }
        debug_assert!(!current.is_free(), "buffer {} released twice", index);
        state.ownership[index as usize] = BufferOwnership::Free;
        let len = state.len;
        state.stack[len] = index;
        state.len += 1;
    }
}

/// A buffer on loan from a [`DmaPool`].
///
/// Dropping it returns it to the pool.
pub struct PoolBuffer {
    pool: &'static DmaPool,
    index: u16,
}

impl PoolBuffer {
    /// Buffer index within the pool.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Device-visible bus address.
    pub fn bus_addr(&self) -> u64 {
        self.pool
            .region
            .buffer_bus(self.index as usize, self.pool.buffer_size)
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.pool.buffer_size
    }

    /// Current ownership state.
    pub fn ownership(&self) -> BufferOwnership {
        self.pool.ownership(self.index)
    }

    /// Buffer bytes.
    pub fn as_slice(&self) -> &[u8] {
        debug_assert!(self.ownership().can_access(), "buffer {} not driver-owned", self.index);
        let ptr = self
            .pool
            .region
            .buffer_cpu(self.index as usize, self.pool.buffer_size);
        // SAFETY: index < count, so the range lies inside the region, and
        // the index is loaned to exactly one PoolBuffer.
        unsafe { core::slice::from_raw_parts(ptr, self.pool.buffer_size) }
    }

    /// Buffer bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        debug_assert!(self.ownership().can_access(), "buffer {} not driver-owned", self.index);
        let ptr = self
            .pool
            .region
            .buffer_cpu(self.index as usize, self.pool.buffer_size);
        // SAFETY: as above; `&mut self` makes the borrow unique.
        unsafe { core::slice::from_raw_parts_mut(ptr, self.pool.buffer_size) }
    }

    /// DriverOwned -> DeviceOwned, right before posting.
    pub fn mark_device_owned(&mut self) {
        self.pool.transition(self.index, BufferOwnership::DeviceOwned);
    }

    /// DeviceOwned -> DriverOwned, once the device has written it back.
    pub fn mark_driver_owned(&mut self) {
        self.pool.transition(self.index, BufferOwnership::DriverOwned);
    }
}

impl fmt::Debug for PoolBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("index", &self.index)
            .field("bus_addr", &self.bus_addr())
            .finish()
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak_pool(buffers: usize, buffer_size: usize) -> &'static DmaPool {
        let backing: &'static mut [u8] = Box::leak(vec![0u8; buffers * buffer_size].into_boxed_slice());
        let region = unsafe { DmaRegion::new(backing.as_mut_ptr(), 0x4000_0000, backing.len()) };
        let pool = unsafe { DmaPool::new(region, buffer_size) }.unwrap();
        Box::leak(Box::new(pool))
    }

    #[test]
    fn test_alloc_until_exhausted() {
        let pool = leak_pool(4, 256);
        let held: Vec<_> = (0..4).map(|_| pool.try_alloc().unwrap()).collect();
        assert_eq!(pool.free_count(), 0);
        assert!(pool.try_alloc().is_none());
        drop(held);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_drop_returns_to_pool() {
        let pool = leak_pool(2, 128);
        let buf = pool.try_alloc().unwrap();
        assert_eq!(buf.index(), 0);
        assert_eq!(pool.free_count(), 1);
        drop(buf);
        assert_eq!(pool.free_count(), 2);
        // LIFO: the buffer just freed comes back first.
        assert_eq!(pool.try_alloc().unwrap().index(), 0);
    }

    #[test]
    fn test_bus_address_and_bytes() {
        let pool = leak_pool(4, 512);
        let _first = pool.try_alloc().unwrap();
        let mut second = pool.try_alloc().unwrap();
        assert_eq!(second.bus_addr(), 0x4000_0000 + 512);
        second.as_mut_slice()[..3].copy_from_slice(&[1, 2, 3]);
        assert_eq!(&second.as_slice()[..3], &[1, 2, 3]);
        assert_eq!(second.capacity(), 512);
    }

    #[test]
    fn test_ownership_transitions() {
        let pool = leak_pool(1, 64);
        let mut buf = pool.try_alloc().unwrap();
        assert_eq!(buf.ownership(), BufferOwnership::DriverOwned);
        buf.mark_device_owned();
        assert_eq!(buf.ownership(), BufferOwnership::DeviceOwned);
        buf.mark_driver_owned();
        assert!(buf.ownership().can_access());
    }

    #[test]
    fn test_drop_while_device_owned_still_frees() {
        let pool = leak_pool(1, 64);
        let mut buf = pool.try_alloc().unwrap();
        buf.mark_device_owned();
        drop(buf);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_construction_errors() {
        let mut backing = [0u8; 100];
        let region = unsafe { DmaRegion::new(backing.as_mut_ptr(), 0, backing.len()) };
        assert_eq!(
            unsafe { DmaPool::new(region, 256) }.err(),
            Some(PoolError::RegionTooSmall { region: 100, buffer: 256 })
        );
        let region = unsafe { DmaRegion::new(backing.as_mut_ptr(), 0, backing.len()) };
        assert_eq!(unsafe { DmaPool::new(region, 0) }.err(), Some(PoolError::ZeroBufferSize));
    }
}
