//! Multi-queue transmit front end.
//!
//! `submit` never blocks. A packet is appended to its queue's pending
//! list, then drained straight into the ring if the TX lock is free. If
//! another CPU holds the lock the drain is handed to that queue's worker
//! through a `TxStart` work item, scheduled at most once at a time.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::descriptor::DescriptorFamily;
use crate::device::{DeviceOps, Upstream, Work};
use crate::dma::DmaPlatform;
use crate::driver::TxQueue;
use crate::engine::Engine;
use crate::error::{EnqueueError, FatalReason, SubmitError};
use crate::interrupt::QueueInterruptContext;
use crate::stats::bump;
use crate::types::{QueueId, QueueMask, TxPacket};

/// Queue selection plus the set of queues allowed to take traffic.
#[derive(Debug)]
pub struct Dispatcher {
    /// Queue count.
    queues: usize,
    /// Round-robin cursor for packets without a flow hash.
    next: AtomicUsize,
    /// Bit N set while queue N is not hung.
    active: AtomicU64,
}

impl Dispatcher {
    /// All `queues` queues active.
    pub fn new(queues: usize) -> Self {
        let all = if queues >= 64 { u64::MAX } else { (1u64 << queues) - 1 };
        Self {
            queues,
            next: AtomicUsize::new(0),
            active: AtomicU64::new(all),
        }
    }

    /// Pick a queue: the flow hash (or round robin) modulo the queue
    /// count, redirected to the first active queue if that one is not
    /// active. `None` when no queue is active.
    pub fn select(&self, hash: Option<u32>) -> Option<QueueId> {
        if self.queues == 0 {
            return None;
        }
        let index = match hash {
            Some(hash) => hash as usize % self.queues,
            None => self.next.fetch_add(1, Ordering::Relaxed) % self.queues,
        };
        let queue = QueueId(index as u16);
        let active = self.active();
        if active.contains(queue) {
            Some(queue)
        } else {
            active.first()
        }
    }

    /// Route traffic to `queue` again.
    pub fn activate(&self, queue: QueueId) {
        self.active.fetch_or(QueueMask::single(queue).0, Ordering::AcqRel);
    }

    /// Route traffic away from `queue`.
    pub fn deactivate(&self, queue: QueueId) {
        self.active.fetch_and(!QueueMask::single(queue).0, Ordering::AcqRel);
    }

    pub fn is_active(&self, queue: QueueId) -> bool {
        self.active().contains(queue)
    }

    /// Currently active queues.
    pub fn active(&self) -> QueueMask {
        QueueMask(self.active.load(Ordering::Acquire))
    }
}

impl<P, H, U, F> Engine<P, H, U, F>
where
    P: DmaPlatform,
    H: DeviceOps,
    U: Upstream<P::Buffer>,
    F: DescriptorFamily,
{
    /// Hand a packet to the engine.
    ///
    /// `Ok` means the engine owns the packet; it is released exactly once
    /// whether it is transmitted or later dropped. `Busy` hands it back:
    /// the pending list is full, no queue is usable, or the device is
    /// wedged. `Fatal` means it was released here.
    pub fn submit(&self, packet: P::Packet) -> Result<(), SubmitError<P::Packet>> {
        if packet.is_empty() {
            if let Some(queue) = self.dispatcher.select(packet.flow_hash()) {
                bump(&self.queues[queue.index()].counters.tx_dropped);
            }
            return Err(SubmitError::Fatal(FatalReason::Empty));
        }
        if self.is_wedged() {
            return Err(SubmitError::Busy(packet));
        }
        let Some(queue) = self.dispatcher.select(packet.flow_hash()) else {
            return Err(SubmitError::Busy(packet));
        };
        let ctx = &self.queues[queue.index()];
        if ctx.is_closed() {
            bump(&ctx.counters.tx_dropped);
            return Err(SubmitError::Fatal(FatalReason::QueueDown));
        }

        if let Err(packet) = ctx.push_pending(packet) {
            bump(&ctx.counters.pending_full);
            return Err(SubmitError::Busy(packet));
        }

        match ctx.tx.try_lock() {
            Some(mut tx) => self.start_locked(ctx, &mut tx),
            None => self.schedule_start(ctx),
        }
        Ok(())
    }

    /// Ask for a `TxStart` on `ctx` unless one is already queued.
    pub(crate) fn schedule_start(&self, ctx: &QueueInterruptContext<P, F>) {
        if ctx.claim_start() {
            self.device.schedule(Work::TxStart(ctx.id()));
        }
    }

    /// Drain `ctx`'s pending list into its ring. The caller holds the TX
    /// lock. Stops at the first `Busy`, putting that packet back at the
    /// head; fatal errors were already counted and released by the ring.
    pub(crate) fn start_locked(&self, ctx: &QueueInterruptContext<P, F>, tx: &mut TxQueue<P::Packet, F::Tx>) {
        if ctx.is_closed() || ctx.stall.is_hung() || self.is_wedged() {
            return;
        }
        let env = ctx.env(&self.platform, &self.device);
        if tx.needs_cleanup() {
            tx.reap(&env);
        }

        while let Some(packet) = ctx.pop_pending() {
            match tx.enqueue(packet, &env) {
                Ok(()) => {}
                Err(EnqueueError::Busy(packet)) => {
                    ctx.requeue_pending(packet);
                    break;
                }
                Err(EnqueueError::Fatal(_)) => {}
            }
        }

        if tx.needs_cleanup() {
            tx.reap(&env);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{complete_tx, test_engine, DeviceEvent, DropCounter, TestPacket};
    use crate::types::Direction;

    #[test]
    fn test_select_by_hash_and_round_robin() {
        let d = Dispatcher::new(4);
        assert_eq!(d.select(Some(6)), Some(QueueId(2)));
        assert_eq!(d.select(Some(6)), Some(QueueId(2)));
        let rr: alloc::vec::Vec<_> = (0..5).map(|_| d.select(None).unwrap().0).collect();
        assert_eq!(rr, [0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_select_skips_inactive() {
        let d = Dispatcher::new(4);
        d.deactivate(QueueId(2));
        assert_eq!(d.select(Some(2)), Some(QueueId(0)));
        d.deactivate(QueueId(0));
        assert_eq!(d.select(Some(2)), Some(QueueId(1)));
        d.activate(QueueId(2));
        assert_eq!(d.select(Some(2)), Some(QueueId(2)));
        for q in 0..4 {
            d.deactivate(QueueId(q));
        }
        assert_eq!(d.select(Some(1)), None);
    }

    #[test]
    fn test_full_mask_for_max_queues() {
        let d = Dispatcher::new(64);
        assert!(d.is_active(QueueId(63)));
        assert_eq!(d.active().0, u64::MAX);
    }

    #[test]
    fn test_submit_posts_directly() {
        let e = test_engine(2, 8, 32);
        let drops = DropCounter::default();
        e.submit(TestPacket::new(100, 1, &drops).with_hash(1)).unwrap();
        let ctx = e.queue(QueueId(1)).unwrap();
        assert_eq!(ctx.pending_len(), 0);
        assert_eq!(ctx.tx.lock().in_flight(), 1);
        assert_eq!(e.device().last_tail(QueueId(1), Direction::Tx), Some(1));
        assert_eq!(e.counters(QueueId(1)).unwrap().tx_enqueued, 1);
    }

    #[test]
    fn test_submit_with_lock_held_defers_once() {
        let e = test_engine(1, 8, 16);
        let drops = DropCounter::default();
        let ctx = e.queue(QueueId(0)).unwrap();
        {
            let _held = ctx.tx.lock();
            e.submit(TestPacket::new(100, 1, &drops)).unwrap();
            e.submit(TestPacket::new(100, 1, &drops)).unwrap();
        }
        assert_eq!(ctx.pending_len(), 2);
        let scheduled = e.device().take_scheduled();
        assert_eq!(scheduled, [Work::TxStart(QueueId(0))]);

        e.run(Work::TxStart(QueueId(0)));
        assert_eq!(ctx.pending_len(), 0);
        assert_eq!(ctx.tx.lock().in_flight(), 2);
        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn test_ring_full_keeps_order_in_pending() {
        let e = test_engine(1, 8, 16);
        let drops = DropCounter::default();
        for n in 0..9 {
            e.submit(TestPacket::new(100 + n, 1, &drops)).unwrap();
        }
        let ctx = e.queue(QueueId(0)).unwrap();
        assert_eq!(ctx.tx.lock().available(), 0);
        assert_eq!(ctx.pending_len(), 2);

        // Completions free room; the next drain posts the oldest first.
        {
            let mut tx = ctx.tx.lock();
            complete_tx(&mut *tx, 7);
        }
        e.handle_interrupt(QueueId(0));
        assert_eq!(ctx.pending_len(), 0);
        let tx = ctx.tx.lock();
        let eop = tx.ring.slot(7).eop.unwrap();
        assert_eq!(tx.ring.slot(eop).packet.as_ref().unwrap().len(), 107);
        assert_eq!(drops.get(), 7);
    }

    #[test]
    fn test_pending_full_is_busy() {
        let mut cfg = crate::testing::test_config(1, 8);
        cfg.queues[0].pending_capacity = 1;
        let e = crate::testing::TestEngine::new(
            cfg,
            crate::testing::MockPlatform::new(16),
            crate::testing::MockDevice::default(),
            crate::testing::RecordingUpstream::default(),
        )
        .ok()
        .unwrap();
        let drops = DropCounter::default();
        let ctx = e.queue(QueueId(0)).unwrap();
        let _held = ctx.tx.lock();
        e.submit(TestPacket::new(100, 1, &drops)).unwrap();
        let err = e.submit(TestPacket::new(200, 1, &drops)).unwrap_err();
        assert_eq!(err.into_packet().map(|p| p.len()), Some(200));
        assert_eq!(e.counters(QueueId(0)).unwrap().pending_full, 1);
    }

    #[test]
    fn test_empty_and_closed_are_fatal() {
        let e = test_engine(1, 8, 16);
        let drops = DropCounter::default();
        let err = e.submit(TestPacket::new(0, 1, &drops)).unwrap_err();
        assert!(matches!(err, SubmitError::Fatal(FatalReason::Empty)));
        assert_eq!(drops.get(), 1);
        assert_eq!(e.counters(QueueId(0)).unwrap().tx_dropped, 1);

        e.queue(QueueId(0)).unwrap().close();
        let err = e.submit(TestPacket::new(64, 1, &drops)).unwrap_err();
        assert!(matches!(err, SubmitError::Fatal(FatalReason::QueueDown)));
        assert_eq!(drops.get(), 2);
        assert_eq!(e.counters(QueueId(0)).unwrap().tx_dropped, 2);
        assert_eq!(e.device().count(DeviceEvent::Schedule(Work::TxStart(QueueId(0)))), 0);
    }

    #[test]
    fn test_fatal_enqueue_does_not_block_drain() {
        let e = test_engine(1, 8, 16);
        let drops = DropCounter::default();
        e.platform().script_map_error(crate::error::MapError::Invalid);
        e.submit(TestPacket::new(100, 1, &drops)).unwrap();
        e.submit(TestPacket::new(100, 1, &drops)).unwrap();
        assert_eq!(drops.get(), 1);
        let c = e.counters(QueueId(0)).unwrap();
        assert_eq!(c.tx_dropped, 1);
        assert_eq!(c.tx_enqueued, 1);
    }
}
