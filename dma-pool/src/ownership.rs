//! Buffer ownership state machine.
//!
//! ```text
//!     FREE ──alloc()──> DRIVER_OWNED ──post()──> DEVICE_OWNED
//!       ▲                     │                       │
//!       └────drop()───────────┴─────reclaim()─────────┘
//! ```
//!
//! Reading or writing a `DeviceOwned` buffer races the device.

/// Who may touch a buffer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferOwnership {
    /// Sitting in the pool's free list.
    #[default]
    Free,
    /// Handed out; software owns the bytes.
    DriverOwned,
    /// Posted to the device; software must not touch it.
    DeviceOwned,
}

impl BufferOwnership {
    /// Buffer can be handed out by the pool.
    #[inline]
    pub fn is_free(self) -> bool {
        self == BufferOwnership::Free
    }

    /// Software may read or write the bytes.
    #[inline]
    pub fn can_access(self) -> bool {
        self == BufferOwnership::DriverOwned
    }

    /// Device may DMA into or out of the buffer.
    #[inline]
    pub fn is_device_owned(self) -> bool {
        self == BufferOwnership::DeviceOwned
    }

    /// Whether `self -> next` is a legal edge of the state machine.
    pub fn can_transition_to(self, next: BufferOwnership) -> bool {
        use BufferOwnership::*;
        matches!(
            (self, next),
            (Free, DriverOwned)
                | (DriverOwned, DeviceOwned)
                | (DeviceOwned, DriverOwned)
                | (DriverOwned, Free)
                | (DeviceOwned, Free)
        )
    }
}
