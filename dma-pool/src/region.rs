//! DMA region definition.

/// DMA-capable memory region.
///
/// Contains both the CPU-accessible pointer and the device-visible bus address.
pub struct DmaRegion {
    /// CPU-accessible pointer to the region.
    pub cpu_ptr: *mut u8,
    /// Device-visible bus address.
    pub bus_addr: u64,
    /// Total size of the region in bytes.
    pub size: usize,
}

impl DmaRegion {
    /// Default buffer size (2KB each).
    pub const DEFAULT_BUFFER_SIZE: usize = 2048;

    /// Create a new DMA region.
    ///
    /// # Safety
    /// - `cpu_ptr` must point to `size` bytes of valid DMA-capable memory
    /// - `bus_addr` must be the corresponding device-visible address
    /// - the memory must outlive every pool built on top of it
    pub unsafe fn new(cpu_ptr: *mut u8, bus_addr: u64, size: usize) -> Self {
        Self {
            cpu_ptr,
            bus_addr,
            size,
        }
    }

    /// Number of whole `buffer_size` buffers the region holds.
    pub fn buffer_count(&self, buffer_size: usize) -> usize {
        if buffer_size == 0 {
            return 0;
        }
        self.size / buffer_size
    }

    /// CPU pointer of buffer `index`.
    pub fn buffer_cpu(&self, index: usize, buffer_size: usize) -> *mut u8 {
        debug_assert!((index + 1) * buffer_size <= self.size);
        unsafe { self.cpu_ptr.add(index * buffer_size) }
    }

    /// Bus address of buffer `index`.
    pub fn buffer_bus(&self, index: usize, buffer_size: usize) -> u64 {
        self.bus_addr + (index * buffer_size) as u64
    }
}

unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}
