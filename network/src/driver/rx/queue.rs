//! Receive descriptor ring.

use core::sync::atomic::{fence, Ordering};

use dma_pool::BufferOwnership;

use super::checksum::classify;
use super::poll::RxPoll;
use crate::config::RingConfig;
use crate::descriptor::{RxDescriptor, RxWriteback};
use crate::device::Doorbell;
use crate::dma::DmaPlatform;
use crate::driver::QueueEnv;
use crate::error::{MapError, SetupError};
use crate::ring::{DescriptorRing, RxChain, RxSlot};
use crate::stats::{add, bump};
use crate::types::{ChecksumStatus, Direction, OffloadFlags, QueueId, RxBuffer, RxChecksum, RxPacket};

/// Whether the ring is mid-way through throwing a packet away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Assembling packets normally.
    Normal,
    /// A descriptor of the current packet had an error; drop everything
    /// up to and including its end-of-packet descriptor.
    Discarding,
}

/// Why a slot could not be refilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillError {
    NoBuffer,
    Map(MapError),
}

/// Receive ring of one queue.
///
/// `next_to_check` is the next descriptor the device will complete.
/// `next_to_refresh` is the last slot given a fresh buffer; it never
/// overtakes `next_to_check`, and is what the tail register points at.
pub struct RxQueue<B, D> {
    /// Queue this ring belongs to.
    id: QueueId,
    /// Descriptors and slots.
    pub(crate) ring: DescriptorRing<D, RxSlot<B>>,
    /// Next descriptor to inspect.
    next_to_check: u16,
    /// Last refreshed slot.
    next_to_refresh: u16,
    /// Discard state; persists across polls.
    state: RxState,
    /// Size of each posted buffer.
    buffer_size: usize,
    /// Copy packets this small into a fresh buffer.
    copy_threshold: usize,
    /// Descriptors per poll.
    process_limit: usize,
    /// Offloads enabled on this queue.
    offload: OffloadFlags,
}

impl<B, D> RxQueue<B, D>
where
    B: RxBuffer,
    D: RxDescriptor,
{
    /// Empty ring for queue `id`. Call [`setup`](Self::setup) to populate.
    pub fn new(id: QueueId, config: &RingConfig) -> Self {
        let ring = DescriptorRing::new(config.ring_size, D::blank, RxSlot::empty);
        Self {
            id,
            next_to_refresh: ring.size() - 1,
            ring,
            next_to_check: 0,
            state: RxState::Normal,
            buffer_size: config.rx_buffer_size,
            copy_threshold: config.rx_copy_threshold,
            process_limit: config.rx_process_limit,
            offload: config.offload,
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

    #[inline]
    pub fn next_to_check(&self) -> u16 {
        self.next_to_check
    }

    #[inline]
    pub fn next_to_refresh(&self) -> u16 {
        self.next_to_refresh
    }

    #[inline]
    pub fn state(&self) -> RxState {
        self.state
    }

    /// Default per-poll descriptor budget.
    #[inline]
    pub fn process_limit(&self) -> usize {
        self.process_limit
    }

    /// The device has completed the next descriptor.
    pub fn completion_pending(&self) -> bool {
        self.ring.desc(self.next_to_check).writeback().is_some()
    }

    /// Populate every slot and hand all but one to the device.
    pub fn setup<P, H>(&mut self, env: &QueueEnv<'_, P, H>) -> Result<(), SetupError>
    where
        P: DmaPlatform<Buffer = B>,
        H: Doorbell,
    {
        for i in 0..self.size() {
            if let Err(e) = self.fill_slot(i, env.platform) {
                self.release_all(env.platform);
                return Err(match e {
                    FillError::NoBuffer => SetupError::OutOfBuffers { populated: i as usize },
                    FillError::Map(e) => SetupError::Map(e),
                });
            }
        }
        self.next_to_check = 0;
        self.next_to_refresh = self.size() - 1;
        self.state = RxState::Normal;

        fence(Ordering::Release);
        env.device.advance_tail(self.id, Direction::Rx, self.next_to_refresh);
        log::debug!("{}: rx ring of {} posted", self.id, self.size());
        Ok(())
    }

    /// Drain completed packets lazily, consuming at most `budget`
    /// descriptors.
    pub fn poll<'q, 'e, P, H>(&'q mut self, budget: usize, env: QueueEnv<'e, P, H>) -> RxPoll<'q, 'e, B, D, P, H>
    where
        P: DmaPlatform<Buffer = B>,
        H: Doorbell,
    {
        RxPoll::new(self, env, budget)
    }

    /// Give fresh (or recycled) buffers to consumed slots, at most
    /// `limit` of them, never past `next_to_check`. The tail is written
    /// once if anything was refreshed. Returns the count refreshed.
    pub fn refill<P, H>(&mut self, limit: usize, env: &QueueEnv<'_, P, H>) -> usize
    where
        P: DmaPlatform<Buffer = B>,
        H: Doorbell,
    {
        let mut refreshed = 0;
        let mut i = self.ring.next(self.next_to_refresh);
        while i != self.next_to_check && refreshed < limit {
            match self.fill_slot(i, env.platform) {
                Ok(()) => {}
                Err(FillError::NoBuffer) => {
                    bump(&env.counters.rx_no_buffer);
                    break;
                }
                Err(FillError::Map(e)) => {
                    log::trace!("{}: rx refill map failed: {}", self.id, e);
                    bump(&env.counters.rx_no_buffer);
                    break;
                }
            }
            self.next_to_refresh = i;
            refreshed += 1;
            i = self.ring.next(i);
        }

        if refreshed > 0 {
            fence(Ordering::Release);
            env.device.advance_tail(self.id, Direction::Rx, self.next_to_refresh);
        }
        refreshed
    }

    /// Release every buffer, chain and mapping. Returns buffers released.
    pub fn teardown<P, H>(&mut self, env: &QueueEnv<'_, P, H>) -> usize
    where
        P: DmaPlatform<Buffer = B>,
    {
        let released = self.release_all(env.platform);
        log::debug!("{}: rx teardown released {} buffers", self.id, released);
        released
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INTERNALS
    // ═══════════════════════════════════════════════════════════════════════

    /// Next completed write-back, if any.
    pub(super) fn take_writeback(&mut self) -> Option<(u16, RxWriteback)> {
        let index = self.next_to_check;
        let wb = self.ring.desc(index).writeback()?;
        fence(Ordering::Acquire);
        Some((index, wb))
    }

    /// Consume descriptor `index`. Returns a packet when this descriptor
    /// completes one.
    pub(super) fn consume<P, H>(
        &mut self,
        index: u16,
        wb: &RxWriteback,
        env: &QueueEnv<'_, P, H>,
    ) -> Option<RxPacket<B>>
    where
        P: DmaPlatform<Buffer = B>,
    {
        let after = self.ring.next(index);
        self.next_to_check = after;

        let (desc, slot) = self.ring.entry_mut(index);
        desc.clear_status();
        slot.owner = BufferOwnership::DriverOwned;
        if let Some(buffer) = slot.buffer.as_mut() {
            buffer.on_reclaim();
        }
        let inbound = slot.chain.take();

        if wb.frame_error || self.state == RxState::Discarding {
            if self.state == RxState::Normal {
                bump(&env.counters.rx_discarded);
                log::trace!("{}: rx discard at slot {}", self.id, index);
            }
            // Earlier fragments go back to their pool here.
            drop(inbound);
            slot.recycle = true;
            self.state = if wb.end_of_packet {
                RxState::Normal
            } else {
                RxState::Discarding
            };
            return None;
        }

        let len = wb.length as usize;
        if inbound.is_none() && wb.end_of_packet && len <= self.copy_threshold {
            if let Some(packet) = self.copy_small(index, len, wb, env) {
                return Some(packet);
            }
        }

        let slot = self.ring.slot_mut(index);
        let Some(buffer) = slot.buffer.take() else {
            log::error!("{}: rx completion on empty slot {}", self.id, index);
            slot.recycle = false;
            return None;
        };
        if let Some(mapping) = slot.mapping.take() {
            env.platform.unmap(mapping);
        }
        slot.recycle = false;
        slot.owner = BufferOwnership::Free;

        let mut chain = inbound.unwrap_or_default();
        chain.push(buffer, len);

        if !wb.end_of_packet {
            let next = if wb.rsc_count > 0 && wb.next_index < self.size() {
                wb.next_index
            } else {
                after
            };
            self.ring.slot_mut(next).chain = Some(chain);
            return None;
        }

        Some(self.finish_packet(chain, wb, false, env))
    }

    /// Copy a small single-buffer packet out and keep the original buffer
    /// posted. `None` falls back to handing up the buffer itself.
    fn copy_small<P, H>(
        &mut self,
        index: u16,
        len: usize,
        wb: &RxWriteback,
        env: &QueueEnv<'_, P, H>,
    ) -> Option<RxPacket<B>>
    where
        P: DmaPlatform<Buffer = B>,
    {
        let mut small = env.platform.alloc_buffer(len)?;
        if small.capacity() < len {
            return None;
        }
        let src = self.ring.slot(index).buffer.as_ref()?;
        small.bytes_mut()[..len].copy_from_slice(&src.bytes()[..len]);
        self.ring.slot_mut(index).recycle = true;
        bump(&env.counters.rx_copied);

        let mut chain = RxChain::new();
        chain.push(small, len);
        Some(self.finish_packet(chain, wb, true, env))
    }

    fn finish_packet<P, H>(
        &self,
        chain: RxChain<B>,
        wb: &RxWriteback,
        copied: bool,
        env: &QueueEnv<'_, P, H>,
    ) -> RxPacket<B> {
        let counters = env.counters;
        let checksum = if self.offload.contains(OffloadFlags::RX_CSUM) {
            classify(wb)
        } else {
            RxChecksum::default()
        };
        if checksum.ip == ChecksumStatus::Bad || checksum.l4 == ChecksumStatus::Bad {
            bump(&counters.rx_csum_bad);
        }
        let vlan = if self.offload.contains(OffloadFlags::VLAN_STRIP) {
            wb.vlan
        } else {
            None
        };

        bump(&counters.rx_delivered);
        add(&counters.rx_bytes, chain.len as u64);
        env.traffic.record_rx(chain.len as u64);
        RxPacket {
            len: chain.len,
            fragments: chain.fragments,
            vlan,
            checksum,
            packet_type: wb.packet_type,
            copied,
        }
    }

    /// Make slot `i` hold a posted buffer.
    fn fill_slot<P>(&mut self, i: u16, platform: &P) -> Result<(), FillError>
    where
        P: DmaPlatform<Buffer = B>,
    {
        let buffer_size = self.buffer_size;
        let (desc, slot) = self.ring.entry_mut(i);
        if slot.buffer.is_none() {
            let buffer = platform.alloc_buffer(buffer_size).ok_or(FillError::NoBuffer)?;
            let mapping = platform.map_buffer(&buffer).map_err(FillError::Map)?;
            slot.buffer = Some(buffer);
            slot.mapping = Some(mapping);
        } else if slot.mapping.is_none() {
            if let Some(buffer) = slot.buffer.as_ref() {
                slot.mapping = Some(platform.map_buffer(buffer).map_err(FillError::Map)?);
            }
        }

        let addr = match slot.mapping.as_ref().and_then(|m| m.segments().first()) {
            Some(segment) => segment.addr,
            None => return Err(FillError::Map(MapError::Invalid)),
        };
        if let Some(buffer) = slot.buffer.as_mut() {
            buffer.on_post();
        }
        slot.recycle = false;
        slot.owner = BufferOwnership::DeviceOwned;
        desc.post(addr);
        Ok(())
    }

    fn release_all<P>(&mut self, platform: &P) -> usize
    where
        P: DmaPlatform<Buffer = B>,
    {
        let mut released = 0;
        for slot in self.ring.slots_mut() {
            if let Some(chain) = slot.chain.take() {
                released += chain.fragments.len();
            }
            if let Some(mapping) = slot.mapping.take() {
                platform.unmap(mapping);
            }
            if slot.buffer.take().is_some() {
                released += 1;
            }
            slot.recycle = false;
            slot.owner = BufferOwnership::Free;
        }
        for i in 0..self.size() {
            *self.ring.desc_mut(i) = D::blank();
        }
        self.next_to_check = 0;
        self.next_to_refresh = self.size() - 1;
        self.state = RxState::Normal;
        released
    }
}
