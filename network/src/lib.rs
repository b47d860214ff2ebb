//! Multi-queue NIC descriptor ring engine.
//!
//! Moves packets between host memory and a device across fixed-size
//! TX/RX descriptor rings. One [`QueueInterruptContext`] per interrupt
//! vector pairs a [`TxQueue`] with an [`RxQueue`]; the [`Engine`] owns
//! every context and exposes the entry points:
//!
//! ```text
//!   submit ──> Dispatcher ──> pending list ──> TxQueue::enqueue ──> device
//!                                                                     │
//!   handle_interrupt / run ──> RxQueue::poll ──> Upstream::deliver    │
//!                          └─> TxQueue::reap <── done bits ───────────┘
//!   watchdog_tick ──> reap + stall detection ──> rearm | reset_required
//! ```
//!
//! The engine owns no registers. Doorbells, interrupt masking and work
//! scheduling go through [`DeviceOps`]; mapping and buffers through
//! [`DmaPlatform`].
//!
//! [`QueueInterruptContext`]: interrupt::QueueInterruptContext
//! [`TxQueue`]: driver::TxQueue
//! [`RxQueue`]: driver::RxQueue

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod descriptor;
pub mod device;
pub mod dispatch;
pub mod dma;
pub mod driver;
pub mod engine;
pub mod error;
pub mod interrupt;
pub mod ring;
pub mod stats;
pub mod types;
pub mod watchdog;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{EngineConfig, ModerationConfig, RingConfig, WatchdogConfig};
pub use descriptor::{Advanced, DescriptorFamily};
pub use device::{DeviceOps, Doorbell, InterruptControl, Upstream, Work};
pub use dispatch::Dispatcher;
pub use dma::{DmaMapping, DmaPlatform};
pub use engine::Engine;
pub use error::{ConfigError, EnqueueError, FatalReason, MapError, SetupError, SubmitError};
pub use interrupt::DispatchOutcome;
pub use stats::CounterSnapshot;
pub use types::{OffloadFlags, QueueId, QueueMask, RxPacket, TxOffloadRequest, TxPacket};
pub use watchdog::WatchdogReport;
