//! Interrupt dispatch.
//!
//! `handle_interrupt` is what the vector's handler calls. It masks the
//! queue, polls RX, reaps TX and drains pending transmits. Moderation
//! then writes the delay computed on the previous interrupt and computes
//! the next one from this interval's traffic. Finally the queue is either
//! unmasked or left masked with a `Service` follow-up scheduled.
//!
//! # Reference
//! 82599 datasheet §7.3.1.4 (EITR), FreeBSD ixgbe `ixgbe_msix_que`.

pub mod context;
pub mod moderation;

pub use context::{DispatchState, QueueInterruptContext, StallDetector, StallVerdict};
pub use moderation::compute_delay;

use crate::descriptor::DescriptorFamily;
use crate::device::{DeviceOps, Upstream, Work};
use crate::dma::DmaPlatform;
use crate::engine::Engine;
use crate::stats::bump;
use crate::types::QueueId;

/// How an interrupt or follow-up ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// All caught up; the interrupt is unmasked again.
    Rearmed,
    /// Work remains; a `Service` item was scheduled and the queue stays
    /// masked.
    Rescheduled,
    /// Another worker owns the queue, it is closed, or no such queue.
    Ignored,
}

impl<P, H, U, F> Engine<P, H, U, F>
where
    P: DmaPlatform,
    H: DeviceOps,
    U: Upstream<P::Buffer>,
    F: DescriptorFamily,
{
    /// Entry point for queue `id`'s interrupt vector.
    pub fn handle_interrupt(&self, id: QueueId) -> DispatchOutcome {
        let Some(ctx) = self.queues.get(id.index()) else {
            return DispatchOutcome::Ignored;
        };
        if !ctx.begin_dispatch() {
            return DispatchOutcome::Ignored;
        }
        bump(&ctx.counters.interrupts);
        ctx.mask(&self.device);
        let more = self.service(ctx);
        self.moderate(ctx);
        self.complete_dispatch(ctx, more)
    }

    /// Run deferred work previously handed to [`InterruptControl::schedule`].
    ///
    /// [`InterruptControl::schedule`]: crate::device::InterruptControl::schedule
    pub fn run(&self, work: Work) -> DispatchOutcome {
        match work {
            Work::Service(id) => {
                let Some(ctx) = self.queues.get(id.index()) else {
                    return DispatchOutcome::Ignored;
                };
                if !ctx.resume_deferred() {
                    return DispatchOutcome::Ignored;
                }
                bump(&ctx.counters.deferred);
                let more = self.service(ctx);
                self.complete_dispatch(ctx, more)
            }
            Work::TxStart(id) => {
                let Some(ctx) = self.queues.get(id.index()) else {
                    return DispatchOutcome::Ignored;
                };
                // Clear first so a submit racing with this drain can
                // schedule again.
                ctx.clear_start();
                if ctx.is_closed() {
                    return DispatchOutcome::Ignored;
                }
                bump(&ctx.counters.deferred);
                let mut tx = ctx.tx.lock();
                self.start_locked(ctx, &mut tx);
                DispatchOutcome::Rearmed
            }
        }
    }

    /// Write last interval's delay, then compute the next one.
    fn moderate(&self, ctx: &QueueInterruptContext<P, F>) {
        let config = &self.config.moderation;
        if !config.enabled {
            return;
        }
        if let Some(delay) = ctx.take_delay() {
            self.device.write_delay(ctx.id(), delay);
        }
        let sample = ctx.traffic.take();
        if let Some(delay) = compute_delay(&sample, config) {
            ctx.store_delay(delay);
        }
    }

    /// Poll RX, reap TX, drain pending. Returns true if more work is
    /// already waiting.
    fn service(&self, ctx: &QueueInterruptContext<P, F>) -> bool {
        let id = ctx.id();
        let env = ctx.env(&self.platform, &self.device);

        let rx_more = {
            let mut rx = ctx.rx.lock();
            let budget = rx.process_limit();
            for packet in rx.poll(budget, env) {
                self.upstream.deliver(id, packet);
            }
            rx.completion_pending()
        };

        let mut tx = ctx.tx.lock();
        if tx.reap(&env) > 0 && ctx.stall.record_progress() {
            log::info!("{}: completions resumed", id);
            self.dispatcher.activate(id);
        }
        if ctx.has_pending() {
            self.start_locked(ctx, &mut tx);
        }
        rx_more || tx.completion_pending()
    }

    fn complete_dispatch(&self, ctx: &QueueInterruptContext<P, F>, more: bool) -> DispatchOutcome {
        if more && ctx.defer() {
            self.device.schedule(Work::Service(ctx.id()));
            return DispatchOutcome::Rescheduled;
        }
        ctx.finish_dispatch();
        ctx.unmask(&self.device);
        DispatchOutcome::Rearmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RxWriteback;
    use crate::testing::{complete_tx, test_engine, write_rx, DeviceEvent, DropCounter, TestPacket};
    use crate::types::TxPacket;

    fn eop() -> RxWriteback {
        RxWriteback {
            end_of_packet: true,
            ..RxWriteback::default()
        }
    }

    #[test]
    fn test_interrupt_delivers_and_reaps_then_unmasks() {
        let e = test_engine(1, 8, 32);
        let id = QueueId(0);
        let drops = DropCounter::default();
        e.submit(TestPacket::new(1000, 1, &drops)).unwrap();
        let ctx = e.queue(id).unwrap();
        complete_tx(&mut *ctx.tx.lock(), 1);
        write_rx(&mut *ctx.rx.lock(), 0, &[0x55; 600], eop());

        assert_eq!(e.handle_interrupt(id), DispatchOutcome::Rearmed);
        let delivered = e.upstream().take();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, id);
        assert_eq!(delivered[0].1.len(), 600);
        assert_eq!(drops.get(), 1);
        let c = e.counters(id).unwrap();
        assert_eq!((c.tx_completed, c.tx_bytes), (1, 1000));
        assert_eq!((c.rx_delivered, c.rx_bytes), (1, 600));
        assert_eq!(c.interrupts, 1);
        assert_eq!(e.device().count(DeviceEvent::Mask(id)), 1);
        assert_eq!(e.device().count(DeviceEvent::Unmask(id)), 1);
        assert_eq!(ctx.state(), DispatchState::Idle);
        assert_eq!(ctx.mask_depth(), 0);
    }

    #[test]
    fn test_idle_interrupt_is_noop_on_rings() {
        let e = test_engine(1, 8, 32);
        let before = e.device().events().len();
        assert_eq!(e.handle_interrupt(QueueId(0)), DispatchOutcome::Rearmed);
        // Only mask and unmask.
        assert_eq!(e.device().events().len(), before + 2);
        assert_eq!(e.upstream().count(), 0);
    }

    #[test]
    fn test_over_budget_reschedules_and_stays_masked() {
        let mut cfg = crate::testing::test_config(1, 8);
        cfg.queues[0].rx_process_limit = 2;
        let e = crate::testing::TestEngine::new(
            cfg,
            crate::testing::MockPlatform::new(32),
            crate::testing::MockDevice::default(),
            crate::testing::RecordingUpstream::default(),
        )
        .ok()
        .unwrap();
        let id = QueueId(0);
        let ctx = e.queue(id).unwrap();
        {
            let mut rx = ctx.rx.lock();
            for i in 0..3 {
                write_rx(&mut *rx, i, &[1; 400], eop());
            }
        }

        assert_eq!(e.handle_interrupt(id), DispatchOutcome::Rescheduled);
        assert_eq!(ctx.state(), DispatchState::Deferred);
        assert_eq!(e.device().count(DeviceEvent::Unmask(id)), 0);
        assert_eq!(e.device().take_scheduled(), [Work::Service(id)]);
        // A second vector hit while deferred is ignored.
        assert_eq!(e.handle_interrupt(id), DispatchOutcome::Ignored);

        assert_eq!(e.run(Work::Service(id)), DispatchOutcome::Rearmed);
        assert_eq!(e.upstream().count(), 3);
        assert_eq!(e.device().count(DeviceEvent::Unmask(id)), 1);
        assert_eq!(ctx.state(), DispatchState::Idle);
        assert_eq!(e.counters(id).unwrap().deferred, 1);
    }

    #[test]
    fn test_moderation_applies_next_interrupt() {
        let e = test_engine(1, 8, 32);
        let id = QueueId(0);
        let ctx = e.queue(id).unwrap();

        write_rx(&mut *ctx.rx.lock(), 0, &[0; 1476], eop());
        e.handle_interrupt(id);
        // Computed from this interrupt's traffic but not written yet.
        assert!(e.device().delays(id).is_empty());

        e.handle_interrupt(id);
        // (1476 + 24) / 2
        assert_eq!(e.device().delays(id), [750]);

        // Idle interval: nothing new to write.
        e.handle_interrupt(id);
        assert_eq!(e.device().delays(id), [750]);
    }

    #[test]
    fn test_moderation_disabled() {
        let mut cfg = crate::testing::test_config(1, 8);
        cfg.moderation = crate::config::ModerationConfig::disabled();
        let e = crate::testing::TestEngine::new(
            cfg,
            crate::testing::MockPlatform::new(32),
            crate::testing::MockDevice::default(),
            crate::testing::RecordingUpstream::default(),
        )
        .ok()
        .unwrap();
        let id = QueueId(0);
        write_rx(&mut *e.queue(id).unwrap().rx.lock(), 0, &[0; 1476], eop());
        e.handle_interrupt(id);
        e.handle_interrupt(id);
        assert!(e.device().delays(id).is_empty());
    }

    #[test]
    fn test_tx_start_drains_pending() {
        let e = test_engine(1, 8, 32);
        let id = QueueId(0);
        let drops = DropCounter::default();
        let ctx = e.queue(id).unwrap();
        {
            let _held = ctx.tx.lock();
            e.submit(TestPacket::new(300, 1, &drops)).unwrap();
        }
        assert_eq!(e.run(Work::TxStart(id)), DispatchOutcome::Rearmed);
        let tx = ctx.tx.lock();
        assert_eq!(tx.in_flight(), 1);
        assert_eq!(tx.ring.slot(0).packet.as_ref().map(|p| p.len()), Some(300));
    }

    #[test]
    fn test_unknown_queue_ignored() {
        let e = test_engine(1, 8, 32);
        assert_eq!(e.handle_interrupt(QueueId(5)), DispatchOutcome::Ignored);
        assert_eq!(e.run(Work::Service(QueueId(5))), DispatchOutcome::Ignored);
        // Service without a preceding deferral is ignored too.
        assert_eq!(e.run(Work::Service(QueueId(0))), DispatchOutcome::Ignored);
    }
}
