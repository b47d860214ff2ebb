//! Shared DMA buffer pool.
//!
//! A fixed region of device-visible memory carved into equal-sized
//! buffers. Allocation never blocks: [`DmaPool::try_alloc`] either hands
//! out a [`PoolBuffer`] or returns `None`. A `PoolBuffer` returns itself
//! to its pool when dropped, so every buffer is released exactly once no
//! matter which path lets go of it.
//!
//! # Ownership
//! Each buffer carries a [`BufferOwnership`] state. Software may touch
//! the bytes only while the buffer is `DriverOwned`.

#![cfg_attr(not(test), no_std)]

pub mod ownership;
pub mod pool;
pub mod region;

// Re-exports
pub use ownership::BufferOwnership;
pub use pool::{DmaPool, PoolBuffer, PoolError, MAX_POOL_SIZE};
pub use region::DmaRegion;
