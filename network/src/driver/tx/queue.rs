//! Transmit descriptor ring.

use core::sync::atomic::{fence, Ordering};

use dma_pool::BufferOwnership;

use super::map::{self, MapFailure, Mapped};
use super::offload;
use crate::config::RingConfig;
use crate::descriptor::{DataCommand, TxDescriptor};
use crate::device::Doorbell;
use crate::dma::DmaPlatform;
use crate::driver::QueueEnv;
use crate::error::{EnqueueError, FatalReason};
use crate::ring::{DescriptorRing, TxSlot};
use crate::stats::{add, bump};
use crate::types::{Direction, OffloadFlags, QueueId, TxPacket};

/// Transmit ring of one queue.
///
/// `next_to_use` is where the next packet's first descriptor goes;
/// `next_to_clean` is the first descriptor not yet reclaimed. One slot
/// always stays empty so a full ring is distinguishable from an empty one.
pub struct TxQueue<P, D> {
    /// Queue this ring belongs to.
    id: QueueId,
    /// Descriptors and slots.
    pub(crate) ring: DescriptorRing<D, TxSlot<P>>,
    /// Next descriptor to fill.
    next_to_use: u16,
    /// Next descriptor to reclaim.
    next_to_clean: u16,
    /// Free descriptors.
    available: u16,
    /// Offloads enabled on this queue.
    offload: OffloadFlags,
    /// Always write a context descriptor.
    needs_context: bool,
    /// Segment limit per packet.
    max_segments: usize,
    /// Packets reclaimed per reap.
    process_limit: usize,
    /// Reap before posting when fewer slots than this are free.
    cleanup_threshold: u16,
}

impl<P, D> TxQueue<P, D>
where
    P: TxPacket,
    D: TxDescriptor,
{
    /// Empty ring for queue `id`.
    pub fn new(id: QueueId, config: &RingConfig) -> Self {
        let ring = DescriptorRing::new(config.ring_size, D::blank, TxSlot::empty);
        Self {
            id,
            available: ring.size() - 1,
            ring,
            next_to_use: 0,
            next_to_clean: 0,
            offload: config.offload,
            needs_context: config.needs_context,
            max_segments: config.max_segments,
            process_limit: config.tx_process_limit,
            cleanup_threshold: config.tx_cleanup_threshold(),
        }
    }

    /// Queue id.
    #[inline]
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Descriptors in the ring.
    #[inline]
    pub fn size(&self) -> u16 {
        self.ring.size()
    }

    /// Free descriptors.
    #[inline]
    pub fn available(&self) -> u16 {
        self.available
    }

    /// Descriptors posted but not yet reclaimed.
    #[inline]
    pub fn in_flight(&self) -> u16 {
        self.ring.distance(self.next_to_clean, self.next_to_use)
    }

    /// Anything posted and not yet reclaimed.
    #[inline]
    pub fn has_outstanding(&self) -> bool {
        self.available < self.size() - 1
    }

    /// Free slots are low enough that a drain should reap first.
    #[inline]
    pub fn needs_cleanup(&self) -> bool {
        self.available < self.cleanup_threshold
    }

    #[inline]
    pub fn next_to_use(&self) -> u16 {
        self.next_to_use
    }

    #[inline]
    pub fn next_to_clean(&self) -> u16 {
        self.next_to_clean
    }

    /// The oldest outstanding packet has completed.
    pub fn completion_pending(&self) -> bool {
        match self.ring.slot(self.next_to_clean).eop {
            Some(eop) => self.ring.desc(eop).is_done(),
            None => false,
        }
    }

    /// Post one packet.
    ///
    /// On `Busy` the ring is left exactly as it was and the packet is
    /// handed back. On `Fatal` the packet has been released.
    pub fn enqueue<Pl, H>(&mut self, packet: P, env: &QueueEnv<'_, Pl, H>) -> Result<(), EnqueueError<P>>
    where
        Pl: DmaPlatform<Packet = P>,
        H: Doorbell,
    {
        if packet.is_empty() {
            bump(&env.counters.tx_dropped);
            return Err(EnqueueError::Fatal(FatalReason::Empty));
        }

        let plan = match offload::plan_offload(
            &packet.offload(),
            self.offload,
            self.needs_context,
            packet.len(),
            packet.headers(),
        ) {
            Ok(plan) => plan,
            Err(reason) => {
                log::trace!("{}: tx drop, {}", self.id, reason);
                bump(&env.counters.tx_dropped);
                return Err(EnqueueError::Fatal(reason));
            }
        };

        let Mapped { packet, mapping } =
            match map::map_for_transmit(packet, env.platform, self.max_segments, env.counters) {
                Ok(mapped) => mapped,
                Err(MapFailure::Busy(packet)) => {
                    bump(&env.counters.tx_busy);
                    return Err(EnqueueError::Busy(packet));
                }
                Err(MapFailure::Fatal(reason)) => {
                    log::trace!("{}: tx drop, {}", self.id, reason);
                    bump(&env.counters.tx_dropped);
                    return Err(EnqueueError::Fatal(reason));
                }
            };

        let needed = mapping.len() + plan.context.is_some() as usize;
        if needed > self.available as usize {
            env.platform.unmap(mapping);
            bump(&env.counters.tx_busy);
            return Err(EnqueueError::Busy(packet));
        }

        let first = self.next_to_use;
        let mut idx = first;

        if let Some(ctx) = &plan.context {
            let (desc, slot) = self.ring.entry_mut(idx);
            desc.write_context(ctx);
            slot.owner = BufferOwnership::DeviceOwned;
            idx = self.ring.next(idx);
            bump(&env.counters.tx_contexts);
        }

        let segments = mapping.segments();
        let mut last = idx;
        for (n, segment) in segments.iter().enumerate() {
            let eop = n + 1 == segments.len();
            let cmd = DataCommand {
                end_of_packet: eop,
                report_status: eop,
                ..plan.command
            };
            let (desc, slot) = self.ring.entry_mut(idx);
            desc.write_data(*segment, &cmd);
            slot.owner = BufferOwnership::DeviceOwned;
            last = idx;
            idx = self.ring.next(idx);
        }

        self.available -= needed as u16;
        self.next_to_use = idx;
        if plan.command.tso {
            bump(&env.counters.tx_tso);
        }

        let eop_slot = self.ring.slot_mut(last);
        eop_slot.packet = Some(packet);
        eop_slot.mapping = Some(mapping);
        self.ring.slot_mut(first).eop = Some(last);

        // Descriptor writes must land before the tail moves.
        fence(Ordering::Release);
        env.device.advance_tail(self.id, Direction::Tx, idx);
        bump(&env.counters.tx_enqueued);
        Ok(())
    }

    /// Reclaim completed packets, returning the number of slots freed.
    ///
    /// Stops at the first packet whose last descriptor is not done, or
    /// after `tx_process_limit` packets. Calling it again with no new
    /// completions changes nothing.
    pub fn reap<Pl, H>(&mut self, env: &QueueEnv<'_, Pl, H>) -> usize
    where
        Pl: DmaPlatform<Packet = P>,
    {
        let mut idx = self.next_to_clean;
        let mut slots = 0usize;
        let mut packets = 0u64;
        let mut bytes = 0u64;

        while (packets as usize) < self.process_limit {
            let eop = match self.ring.slot(idx).eop {
                Some(eop) => eop,
                None => break,
            };
            if !self.ring.desc(eop).is_done() {
                break;
            }
            fence(Ordering::Acquire);

            loop {
                let (desc, slot) = self.ring.entry_mut(idx);
                slot.eop = None;
                if let Some(mapping) = slot.mapping.take() {
                    env.platform.unmap(mapping);
                }
                if let Some(packet) = slot.packet.take() {
                    bytes += packet.len() as u64;
                }
                slot.owner = BufferOwnership::Free;
                desc.clear();
                slots += 1;

                let done = idx == eop;
                idx = self.ring.next(idx);
                if done {
                    break;
                }
            }
            packets += 1;
        }

        if slots > 0 {
            self.next_to_clean = idx;
            self.available += slots as u16;
            env.traffic.record_tx(bytes, packets);
            add(&env.counters.tx_completed, packets);
            add(&env.counters.tx_bytes, bytes);
            log::trace!("{}: reaped {} packets / {} slots", self.id, packets, slots);
        }
        slots
    }

    /// Release everything: completed packets through `reap`, then every
    /// remaining packet and mapping unconditionally. Returns how many
    /// packets were released without completing.
    pub fn teardown<Pl, H>(&mut self, env: &QueueEnv<'_, Pl, H>) -> usize
    where
        Pl: DmaPlatform<Packet = P>,
    {
        while self.reap(env) > 0 {}

        let mut released = 0;
        for slot in self.ring.slots_mut() {
            if let Some(mapping) = slot.mapping.take() {
                env.platform.unmap(mapping);
            }
            if slot.packet.take().is_some() {
                released += 1;
            }
            slot.eop = None;
            slot.owner = BufferOwnership::Free;
        }
        for i in 0..self.size() {
            self.ring.desc_mut(i).clear();
        }
        self.next_to_use = 0;
        self.next_to_clean = 0;
        self.available = self.size() - 1;
        if released > 0 {
            log::debug!("{}: tx teardown released {} in-flight packets", self.id, released);
        }
        released
    }
}
