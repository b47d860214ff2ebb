//! Receive path.

pub mod checksum;
pub mod poll;
pub mod queue;

pub use checksum::classify;
pub use poll::RxPoll;
pub use queue::{RxQueue, RxState};

/// Descriptors consumed between in-poll refills.
pub const REFRESH_BATCH: usize = 8;
