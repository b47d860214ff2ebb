//! Device-side collaborators.
//!
//! The engine owns no registers. Tail doorbells, interrupt masking,
//! delay programming and deferred-work scheduling all go through these
//! traits so the same ring logic runs against real hardware or a
//! simulated NIC.

use crate::types::{Direction, QueueId, QueueMask, RxPacket};

/// Deferred work the engine asks to have run later on some worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Work {
    /// Finish servicing a queue whose interrupt left work behind.
    Service(QueueId),
    /// Drain a queue's pending list into its TX ring.
    TxStart(QueueId),
}

/// Tail register writes.
pub trait Doorbell: Send + Sync {
    /// Publish `tail` as the new tail of a ring.
    fn advance_tail(&self, queue: QueueId, ring: Direction, tail: u16);
}

/// Interrupt control and deferred scheduling.
pub trait InterruptControl: Send + Sync {
    /// Mask the queue's interrupt.
    fn mask(&self, queue: QueueId);
    /// Unmask the queue's interrupt.
    fn unmask(&self, queue: QueueId);
    /// Force an interrupt on every queue in `queues`.
    fn rearm(&self, queues: QueueMask);
    /// Program the queue's interrupt delay.
    fn write_delay(&self, queue: QueueId, delay: u32);
    /// Run `work` later, outside the current context.
    fn schedule(&self, work: Work);
}

/// Everything the engine needs from the device.
pub trait DeviceOps: Doorbell + InterruptControl {}

impl<T: Doorbell + InterruptControl> DeviceOps for T {}

/// Receives completed packets.
pub trait Upstream<B>: Send + Sync {
    /// Take ownership of a received packet.
    fn deliver(&self, queue: QueueId, packet: RxPacket<B>);
}
