//! Per-vector queue state.
//!
//! One [`QueueInterruptContext`] binds a TX ring and an RX ring to a
//! single interrupt source. Each ring has its own lock; everything else
//! the interrupt path, the watchdog and the dispatcher share is atomic.
//!
//! ```text
//!            handle_interrupt          more work
//!   IDLE ─────────────────────> DISPATCHING ─────────> DEFERRED
//!    ▲                               │                    │
//!    └────────── done, unmask ───────┘<──── run(Service) ─┘
//!
//!   any state except DISPATCHING ──close()──> CLOSED ──reopen()──> IDLE
//! ```

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use spin::Mutex;

use crate::config::RingConfig;
use crate::descriptor::DescriptorFamily;
use crate::device::InterruptControl;
use crate::dma::DmaPlatform;
use crate::driver::{QueueEnv, RxQueue, TxQueue};
use crate::stats::{QueueCounters, TrafficCounters};
use crate::types::QueueId;

/// Dispatch state of one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatchState {
    /// Interrupt unmasked, nothing running.
    Idle = 0,
    /// A worker is servicing the queue.
    Dispatching = 1,
    /// Service left work behind and a follow-up is scheduled.
    Deferred = 2,
    /// Torn down; no new work is accepted.
    Closed = 3,
}

impl DispatchState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => DispatchState::Idle,
            1 => DispatchState::Dispatching,
            2 => DispatchState::Deferred,
            _ => DispatchState::Closed,
        }
    }
}

/// What the stall detector concluded for one watchdog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallVerdict {
    /// Completions were reclaimed.
    Progress,
    /// Nothing outstanding, nothing to wait for.
    Idle,
    /// Outstanding work, no completions, below the threshold.
    Stalled(u32),
    /// Threshold reached on this tick.
    Hung,
    /// Was already hung.
    StillHung,
    /// Was hung and has completed work again.
    Recovered,
}

/// Consecutive no-progress ticks of one queue.
#[derive(Debug, Default)]
pub struct StallDetector {
    /// Ticks with outstanding work and no completions.
    count: AtomicU32,
    /// Threshold was reached and no progress seen since.
    hung: AtomicBool,
}

impl StallDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one watchdog observation in.
    pub fn observe(&self, reaped: usize, outstanding: bool, threshold: u32) -> StallVerdict {
        if reaped > 0 || !outstanding {
            self.count.store(0, Ordering::Relaxed);
            return match (self.hung.swap(false, Ordering::AcqRel), reaped > 0) {
                (true, _) => StallVerdict::Recovered,
                (false, true) => StallVerdict::Progress,
                (false, false) => StallVerdict::Idle,
            };
        }

        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count < threshold {
            return StallVerdict::Stalled(count);
        }
        if self.hung.swap(true, Ordering::AcqRel) {
            StallVerdict::StillHung
        } else {
            StallVerdict::Hung
        }
    }

    /// Completions seen outside the watchdog. Returns true if this clears
    /// a hung state.
    pub fn record_progress(&self) -> bool {
        self.count.store(0, Ordering::Relaxed);
        self.hung.swap(false, Ordering::AcqRel)
    }

    pub fn is_hung(&self) -> bool {
        self.hung.load(Ordering::Acquire)
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.hung.store(false, Ordering::Release);
    }
}

/// Bounded FIFO of packets waiting for the TX ring.
struct PendingList<P> {
    packets: VecDeque<P>,
    capacity: usize,
}

/// Ring pair, interrupt bookkeeping and counters for one queue.
pub struct QueueInterruptContext<P: DmaPlatform, F: DescriptorFamily> {
    /// Queue id, also the interrupt vector index.
    id: QueueId,
    /// Transmit ring.
    pub(crate) tx: Mutex<TxQueue<P::Packet, F::Tx>>,
    /// Receive ring.
    pub(crate) rx: Mutex<RxQueue<P::Buffer, F::Rx>>,
    /// Packets submitted while the TX lock was busy or the ring full.
    pending: Mutex<PendingList<P::Packet>>,
    /// A `TxStart` for this queue is already scheduled.
    start_scheduled: AtomicBool,
    /// Moderation input.
    pub(crate) traffic: TrafficCounters,
    /// Event counters.
    pub(crate) counters: QueueCounters,
    /// Delay computed last interrupt, written next interrupt. 0 = none.
    pending_delay: AtomicU32,
    /// Watchdog state.
    pub(crate) stall: StallDetector,
    /// [`DispatchState`] as u8.
    state: AtomicU8,
    /// Mask nesting depth.
    mask_depth: Mutex<u32>,
}

impl<P: DmaPlatform, F: DescriptorFamily> QueueInterruptContext<P, F> {
    /// Fresh context with empty rings. The RX ring still needs `setup`.
    pub fn new(id: QueueId, config: &RingConfig) -> Self {
        Self {
            id,
            tx: Mutex::new(TxQueue::new(id, config)),
            rx: Mutex::new(RxQueue::new(id, config)),
            pending: Mutex::new(PendingList {
                packets: VecDeque::new(),
                capacity: config.pending_capacity,
            }),
            start_scheduled: AtomicBool::new(false),
            traffic: TrafficCounters::new(),
            counters: QueueCounters::new(),
            pending_delay: AtomicU32::new(0),
            stall: StallDetector::new(),
            state: AtomicU8::new(DispatchState::Idle as u8),
            mask_depth: Mutex::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Collaborators bundled for one ring call.
    pub(crate) fn env<'a, H>(&'a self, platform: &'a P, device: &'a H) -> QueueEnv<'a, P, H> {
        QueueEnv::new(platform, device, &self.traffic, &self.counters)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DISPATCH STATE
    // ═══════════════════════════════════════════════════════════════════════

    pub fn state(&self) -> DispatchState {
        DispatchState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == DispatchState::Closed
    }

    fn transition(&self, from: DispatchState, to: DispatchState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Idle -> Dispatching. False if someone else owns the queue.
    pub(crate) fn begin_dispatch(&self) -> bool {
        self.transition(DispatchState::Idle, DispatchState::Dispatching)
    }

    /// Deferred -> Dispatching, for the scheduled follow-up.
    pub(crate) fn resume_deferred(&self) -> bool {
        self.transition(DispatchState::Deferred, DispatchState::Dispatching)
    }

    /// Dispatching -> Deferred.
    pub(crate) fn defer(&self) -> bool {
        self.transition(DispatchState::Dispatching, DispatchState::Deferred)
    }

    /// Dispatching -> Idle.
    pub(crate) fn finish_dispatch(&self) -> bool {
        self.transition(DispatchState::Dispatching, DispatchState::Idle)
    }

    /// Move to Closed once no worker is mid-dispatch. Returns the state it
    /// replaced, or `None` if the queue was already closed. A `Deferred`
    /// queue is still masked for its scheduled follow-up, which will now be
    /// ignored; that mask level passes to the caller.
    pub(crate) fn close(&self) -> Option<DispatchState> {
        loop {
            match self.state() {
                DispatchState::Closed => return None,
                DispatchState::Dispatching => core::hint::spin_loop(),
                current => {
                    if self.transition(current, DispatchState::Closed) {
                        return Some(current);
                    }
                }
            }
        }
    }

    /// Closed -> Idle.
    pub(crate) fn reopen(&self) {
        self.state.store(DispatchState::Idle as u8, Ordering::Release);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INTERRUPT MASK
    // ═══════════════════════════════════════════════════════════════════════

    /// Nested mask; only the outermost call touches the device.
    pub fn mask<H: InterruptControl>(&self, device: &H) {
        let mut depth = self.mask_depth.lock();
        *depth += 1;
        if *depth == 1 {
            device.mask(self.id);
        }
    }

    /// Undo one [`mask`](Self::mask); the last one unmasks the device.
    pub fn unmask<H: InterruptControl>(&self, device: &H) {
        let mut depth = self.mask_depth.lock();
        match *depth {
            0 => log::warn!("{}: unbalanced unmask", self.id),
            1 => {
                *depth = 0;
                device.unmask(self.id);
            }
            _ => *depth -= 1,
        }
    }

    pub fn mask_depth(&self) -> u32 {
        *self.mask_depth.lock()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PENDING LIST
    // ═══════════════════════════════════════════════════════════════════════

    /// Append a packet; hands it back when the list is full.
    pub(crate) fn push_pending(&self, packet: P::Packet) -> Result<(), P::Packet> {
        let mut pending = self.pending.lock();
        if pending.packets.len() >= pending.capacity {
            return Err(packet);
        }
        pending.packets.push_back(packet);
        Ok(())
    }

    /// Put a packet the ring refused back at the head.
    pub(crate) fn requeue_pending(&self, packet: P::Packet) {
        self.pending.lock().packets.push_front(packet);
    }

    pub(crate) fn pop_pending(&self) -> Option<P::Packet> {
        self.pending.lock().packets.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().packets.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().packets.is_empty()
    }

    /// Release every pending packet. Returns how many.
    pub(crate) fn drop_pending(&self) -> usize {
        let drained = core::mem::take(&mut self.pending.lock().packets);
        let n = drained.len();
        drop(drained);
        n
    }

    /// Claim the right to schedule a `TxStart`. False if one is queued.
    pub(crate) fn claim_start(&self) -> bool {
        !self.start_scheduled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_start(&self) {
        self.start_scheduled.store(false, Ordering::Release);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MODERATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Delay waiting to be written, clearing it.
    pub(crate) fn take_delay(&self) -> Option<u32> {
        match self.pending_delay.swap(0, Ordering::AcqRel) {
            0 => None,
            delay => Some(delay),
        }
    }

    pub(crate) fn store_delay(&self, delay: u32) {
        self.pending_delay.store(delay, Ordering::Release);
    }

    pub fn traffic(&self) -> &TrafficCounters {
        &self.traffic
    }

    pub fn counters(&self) -> &QueueCounters {
        &self.counters
    }

    pub fn stall(&self) -> &StallDetector {
        &self.stall
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Advanced;
    use crate::testing::{DeviceEvent, DropCounter, MockDevice, MockPlatform, TestPacket};
    use crate::types::TxPacket;

    type Ctx = QueueInterruptContext<MockPlatform, Advanced>;

    fn ctx(pending: usize) -> Ctx {
        let mut cfg = RingConfig::new();
        cfg.ring_size = 8;
        cfg.pending_capacity = pending;
        QueueInterruptContext::new(QueueId(1), &cfg)
    }

    #[test]
    fn test_dispatch_transitions() {
        let c = ctx(4);
        assert_eq!(c.state(), DispatchState::Idle);
        assert!(c.begin_dispatch());
        assert!(!c.begin_dispatch());
        assert!(c.defer());
        assert!(!c.begin_dispatch());
        assert!(c.resume_deferred());
        assert!(c.finish_dispatch());
        assert_eq!(c.state(), DispatchState::Idle);

        assert_eq!(c.close(), Some(DispatchState::Idle));
        assert_eq!(c.close(), None);
        assert!(!c.begin_dispatch());
        c.reopen();
        assert!(c.begin_dispatch());
    }

    #[test]
    fn test_close_from_deferred() {
        let c = ctx(4);
        assert!(c.begin_dispatch());
        assert!(c.defer());
        assert_eq!(c.close(), Some(DispatchState::Deferred));
        assert!(!c.resume_deferred());
    }

    #[test]
    fn test_mask_nesting() {
        let c = ctx(4);
        let dev = MockDevice::default();
        c.mask(&dev);
        c.mask(&dev);
        assert_eq!(c.mask_depth(), 2);
        c.unmask(&dev);
        assert_eq!(dev.count(DeviceEvent::Unmask(QueueId(1))), 0);
        c.unmask(&dev);
        assert_eq!(dev.count(DeviceEvent::Mask(QueueId(1))), 1);
        assert_eq!(dev.count(DeviceEvent::Unmask(QueueId(1))), 1);
        // Extra unmask is ignored.
        c.unmask(&dev);
        assert_eq!(dev.count(DeviceEvent::Unmask(QueueId(1))), 1);
    }

    #[test]
    fn test_pending_capacity_and_order() {
        let c = ctx(2);
        let drops = DropCounter::default();
        c.push_pending(TestPacket::new(1, 1, &drops)).unwrap();
        c.push_pending(TestPacket::new(2, 1, &drops)).unwrap();
        let refused = c.push_pending(TestPacket::new(3, 1, &drops)).unwrap_err();
        assert_eq!(refused.len(), 3);
        drop(refused);

        let first = c.pop_pending().unwrap();
        c.requeue_pending(first);
        assert_eq!(c.pop_pending().unwrap().len(), 1);
        assert_eq!(c.drop_pending(), 1);
        assert!(!c.has_pending());
        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn test_start_claim_dedup() {
        let c = ctx(2);
        assert!(c.claim_start());
        assert!(!c.claim_start());
        c.clear_start();
        assert!(c.claim_start());
    }

    #[test]
    fn test_stall_detector() {
        let s = StallDetector::new();
        assert_eq!(s.observe(0, false, 3), StallVerdict::Idle);
        assert_eq!(s.observe(0, true, 3), StallVerdict::Stalled(1));
        assert_eq!(s.observe(0, true, 3), StallVerdict::Stalled(2));
        assert_eq!(s.observe(0, true, 3), StallVerdict::Hung);
        assert_eq!(s.observe(0, true, 3), StallVerdict::StillHung);
        assert!(s.is_hung());
        assert_eq!(s.observe(2, true, 3), StallVerdict::Recovered);
        assert_eq!(s.count(), 0);
        assert_eq!(s.observe(0, true, 3), StallVerdict::Stalled(1));
        assert_eq!(s.observe(1, true, 3), StallVerdict::Progress);
    }

    #[test]
    fn test_delay_handoff() {
        let c = ctx(2);
        assert_eq!(c.take_delay(), None);
        c.store_delay(200);
        assert_eq!(c.take_delay(), Some(200));
        assert_eq!(c.take_delay(), None);
    }
}
