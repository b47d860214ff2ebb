//! Ring drivers.
//!
//! [`TxQueue`] and [`RxQueue`] are single-owner state machines: every
//! operation takes `&mut self`, and the interrupt context wraps each one
//! in its own lock. Collaborators are passed in per call as a
//! [`QueueEnv`] rather than stored, so a queue can be torn down and
//! rebuilt without touching them.

pub mod rx;
pub mod tx;

pub use rx::{RxPoll, RxQueue, RxState};
pub use tx::TxQueue;

use crate::stats::{QueueCounters, TrafficCounters};

/// Collaborators and counters for one queue operation.
pub struct QueueEnv<'a, P, H> {
    /// Mapping and buffer services.
    pub platform: &'a P,
    /// Doorbell writes.
    pub device: &'a H,
    /// Moderation input.
    pub traffic: &'a TrafficCounters,
    /// Event counters.
    pub counters: &'a QueueCounters,
}

impl<'a, P, H> QueueEnv<'a, P, H> {
    pub fn new(
        platform: &'a P,
        device: &'a H,
        traffic: &'a TrafficCounters,
        counters: &'a QueueCounters,
    ) -> Self {
        Self {
            platform,
            device,
            traffic,
            counters,
        }
    }
}

impl<P, H> Clone for QueueEnv<'_, P, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, H> Copy for QueueEnv<'_, P, H> {}
