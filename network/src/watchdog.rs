//! Periodic stall detection.
//!
//! Called from a timer, independent of interrupts. Each tick reclaims
//! whatever completed on every open queue and feeds the result to the
//! queue's [`StallDetector`]:
//!
//! - a queue that makes no progress for `stall_threshold` ticks while
//!   work is outstanding is declared hung and taken out of selection
//! - a hung queue that completes work again is put back
//! - when every open queue is hung the device is considered wedged:
//!   pending packets are released and the caller is told to reset
//! - otherwise queues with work in flight are re-armed, covering a lost
//!   interrupt
//!
//! [`StallDetector`]: crate::interrupt::StallDetector

use core::sync::atomic::Ordering;

use crate::descriptor::DescriptorFamily;
use crate::device::{DeviceOps, InterruptControl, Upstream};
use crate::dma::DmaPlatform;
use crate::engine::Engine;
use crate::interrupt::StallVerdict;
use crate::stats::add;
use crate::types::QueueMask;

/// Result of one watchdog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchdogReport {
    /// Queues hung as of this tick.
    pub hung: QueueMask,
    /// Queues whose interrupt was re-armed.
    pub rearmed: QueueMask,
    /// Every open queue is hung; the owner must call `reset`. Reported
    /// once per wedge.
    pub reset_required: bool,
}

impl<P, H, U, F> Engine<P, H, U, F>
where
    P: DmaPlatform,
    H: DeviceOps,
    U: Upstream<P::Buffer>,
    F: DescriptorFamily,
{
    /// One watchdog pass over every queue.
    pub fn watchdog_tick(&self) -> WatchdogReport {
        let threshold = self.config.watchdog.stall_threshold;
        let mut report = WatchdogReport::default();
        let mut open = 0usize;

        for ctx in &self.queues {
            if ctx.is_closed() {
                continue;
            }
            open += 1;
            let id = ctx.id();

            // A busy lock means someone is reaping right now.
            let Some(mut tx) = ctx.tx.try_lock() else {
                if ctx.stall.is_hung() {
                    report.hung.insert(id);
                }
                continue;
            };
            let env = ctx.env(&self.platform, &self.device);
            let reaped = tx.reap(&env);
            let outstanding = tx.has_outstanding();

            match ctx.stall.observe(reaped, outstanding, threshold) {
                StallVerdict::Hung => {
                    log::warn!("{}: no tx completions for {} ticks, queue hung", id, threshold);
                    self.dispatcher.deactivate(id);
                    report.hung.insert(id);
                }
                StallVerdict::StillHung => report.hung.insert(id),
                StallVerdict::Recovered => {
                    log::info!("{}: tx completions resumed", id);
                    self.dispatcher.activate(id);
                }
                StallVerdict::Stalled(count) => {
                    log::trace!("{}: stalled {}/{}", id, count, threshold);
                }
                StallVerdict::Progress | StallVerdict::Idle => {}
            }

            if reaped > 0 && ctx.has_pending() {
                self.start_locked(ctx, &mut tx);
            }
            let tx_busy = tx.has_outstanding();
            drop(tx);

            if !ctx.stall.is_hung() && (tx_busy || ctx.rx.lock().completion_pending()) {
                report.rearmed.insert(id);
            }
        }

        let hung = report.hung.count();
        if open > 0 && hung == open {
            if !self.wedged.swap(true, Ordering::AcqRel) {
                log::error!("nicring: all {} queues hung, device needs reset", open);
                self.release_pending();
                report.reset_required = true;
            }
        } else if !report.rearmed.is_empty() {
            self.device.rearm(report.rearmed);
        }
        report
    }

    /// Drop every queue's pending packets.
    fn release_pending(&self) {
        for ctx in &self.queues {
            let dropped = ctx.drop_pending();
            if dropped > 0 {
                add(&ctx.counters.pending_dropped, dropped as u64);
                log::debug!("{}: released {} pending packets", ctx.id(), dropped);
            }
        }
    }
}
