//! Simulated platform and device for unit tests.
//!
//! The pool is identity mapped (bus address == CPU pointer), so the
//! simulated NIC can "DMA" straight through a descriptor's address.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dma_pool::{DmaPool, DmaRegion, PoolBuffer};
use spin::Mutex;

use crate::config::{EngineConfig, RingConfig};
use crate::descriptor::{AdvancedRxDescriptor, AdvancedTxDescriptor, RxWriteback, TxDescriptor};
use crate::device::{Doorbell, InterruptControl, Upstream, Work};
use crate::dma::pool::map_pool_buffer;
use crate::dma::{DmaMapping, DmaPlatform};
use crate::driver::{RxQueue, TxQueue};
use crate::engine::Engine;
use crate::error::MapError;
use crate::types::{Direction, QueueId, QueueMask, RxPacket, Segment, TxOffloadRequest, TxPacket};

// ═══════════════════════════════════════════════════════════════════════════
// MEMORY
// ═══════════════════════════════════════════════════════════════════════════

/// A leaked pool whose bus addresses are its CPU addresses.
pub fn leak_pool(buffers: usize, buffer_size: usize) -> &'static DmaPool {
    let backing: &'static mut [u8] = Box::leak(vec![0u8; buffers * buffer_size].into_boxed_slice());
    let ptr = backing.as_mut_ptr();
    let region = unsafe { DmaRegion::new(ptr, ptr as u64, backing.len()) };
    let pool = unsafe { DmaPool::new(region, buffer_size) }.unwrap();
    Box::leak(Box::new(pool))
}

// ═══════════════════════════════════════════════════════════════════════════
// PACKETS
// ═══════════════════════════════════════════════════════════════════════════

/// Counts how many [`TestPacket`]s have been released.
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outbound packet that reports its own release.
#[derive(Debug)]
pub struct TestPacket {
    len: usize,
    headers: Vec<u8>,
    segments: usize,
    offload: TxOffloadRequest,
    hash: Option<u32>,
    drops: DropCounter,
}

impl TestPacket {
    /// `len` bytes split across `segments` DMA segments.
    pub fn new(len: usize, segments: usize, drops: &DropCounter) -> Self {
        Self {
            len,
            headers: Vec::new(),
            segments,
            offload: TxOffloadRequest::none(),
            hash: None,
            drops: drops.clone(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<u8>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_offload(mut self, offload: TxOffloadRequest) -> Self {
        self.offload = offload;
        self
    }

    pub fn with_hash(mut self, hash: u32) -> Self {
        self.hash = Some(hash);
        self
    }
}

impl TxPacket for TestPacket {
    fn len(&self) -> usize {
        self.len
    }

    fn headers(&self) -> &[u8] {
        &self.headers
    }

    fn offload(&self) -> TxOffloadRequest {
        self.offload
    }

    fn flow_hash(&self) -> Option<u32> {
        self.hash
    }
}

impl Drop for TestPacket {
    fn drop(&mut self) {
        self.drops.0.fetch_add(1, Ordering::SeqCst);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PLATFORM
// ═══════════════════════════════════════════════════════════════════════════

/// DMA platform over a leaked identity-mapped pool.
pub struct MockPlatform {
    pool: &'static DmaPool,
    /// Errors returned by the next `map_packet` calls, oldest first.
    map_errors: Mutex<Vec<MapError>>,
    /// Segments a coalesced packet ends up with; `None` fails.
    coalesce_to: Mutex<Option<usize>>,
    coalesce_calls: AtomicUsize,
    live: AtomicUsize,
    next_token: AtomicUsize,
    fail_alloc: AtomicBool,
}

impl MockPlatform {
    /// Pool of `buffers` 2 KiB receive buffers.
    pub fn new(buffers: usize) -> Self {
        Self {
            pool: leak_pool(buffers, 2048),
            map_errors: Mutex::new(Vec::new()),
            coalesce_to: Mutex::new(Some(1)),
            coalesce_calls: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            next_token: AtomicUsize::new(1),
            fail_alloc: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &'static DmaPool {
        self.pool
    }

    /// Fail the next `map_packet` with `err`.
    pub fn script_map_error(&self, err: MapError) {
        self.map_errors.lock().push(err);
    }

    pub fn set_coalesce(&self, segments: Option<usize>) {
        *self.coalesce_to.lock() = segments;
    }

    pub fn coalesce_calls(&self) -> usize {
        self.coalesce_calls.load(Ordering::SeqCst)
    }

    /// Mappings handed out and not yet unmapped.
    pub fn live_mappings(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn set_fail_alloc(&self, fail: bool) {
        self.fail_alloc.store(fail, Ordering::SeqCst);
    }
}

impl DmaPlatform for MockPlatform {
    type Packet = TestPacket;
    type Buffer = PoolBuffer;

    fn map_packet(&self, packet: &TestPacket, _max_segments: usize) -> Result<DmaMapping, MapError> {
        {
            let mut errors = self.map_errors.lock();
            if !errors.is_empty() {
                return Err(errors.remove(0));
            }
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) as u64;
        let per = (packet.len / packet.segments.max(1)).max(1) as u32;
        let segments = (0..packet.segments)
            .map(|n| Segment {
                addr: 0x8000_0000 + (token << 16) + (n as u64) * 0x1000,
                len: per,
            })
            .collect();
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(DmaMapping::new(segments, token))
    }

    fn coalesce(&self, mut packet: TestPacket) -> Result<TestPacket, TestPacket> {
        self.coalesce_calls.fetch_add(1, Ordering::SeqCst);
        match *self.coalesce_to.lock() {
            Some(segments) => {
                packet.segments = segments;
                Ok(packet)
            }
            None => Err(packet),
        }
    }

    fn alloc_buffer(&self, size: usize) -> Option<PoolBuffer> {
        if self.fail_alloc.load(Ordering::SeqCst) || size > self.pool.buffer_size() {
            return None;
        }
        self.pool.try_alloc()
    }

    fn map_buffer(&self, buffer: &PoolBuffer) -> Result<DmaMapping, MapError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(map_pool_buffer(buffer))
    }

    fn unmap(&self, _mapping: DmaMapping) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DEVICE
// ═══════════════════════════════════════════════════════════════════════════

/// Register writes and scheduling requests, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Tail(QueueId, Direction, u16),
    Mask(QueueId),
    Unmask(QueueId),
    Rearm(QueueMask),
    Delay(QueueId, u32),
    Schedule(Work),
}

/// Records everything the engine asks of the device.
#[derive(Default)]
pub struct MockDevice {
    events: Mutex<Vec<DeviceEvent>>,
}

impl MockDevice {
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn last_tail(&self, queue: QueueId, ring: Direction) -> Option<u16> {
        self.events.lock().iter().rev().find_map(|e| match *e {
            DeviceEvent::Tail(q, d, tail) if q == queue && d == ring => Some(tail),
            _ => None,
        })
    }

    /// Scheduled work, oldest first, removed from the log.
    pub fn take_scheduled(&self) -> Vec<Work> {
        let mut events = self.events.lock();
        let mut work = Vec::new();
        events.retain(|e| match *e {
            DeviceEvent::Schedule(w) => {
                work.push(w);
                false
            }
            _ => true,
        });
        work
    }

    pub fn delays(&self, queue: QueueId) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match *e {
                DeviceEvent::Delay(q, d) if q == queue => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn rearms(&self) -> Vec<QueueMask> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match *e {
                DeviceEvent::Rearm(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: DeviceEvent) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }

    fn push(&self, event: DeviceEvent) {
        self.events.lock().push(event);
    }
}

impl Doorbell for MockDevice {
    fn advance_tail(&self, queue: QueueId, ring: Direction, tail: u16) {
        self.push(DeviceEvent::Tail(queue, ring, tail));
    }
}

impl InterruptControl for MockDevice {
    fn mask(&self, queue: QueueId) {
        self.push(DeviceEvent::Mask(queue));
    }

    fn unmask(&self, queue: QueueId) {
        self.push(DeviceEvent::Unmask(queue));
    }

    fn rearm(&self, queues: QueueMask) {
        self.push(DeviceEvent::Rearm(queues));
    }

    fn write_delay(&self, queue: QueueId, delay: u32) {
        self.push(DeviceEvent::Delay(queue, delay));
    }

    fn schedule(&self, work: Work) {
        self.push(DeviceEvent::Schedule(work));
    }
}

/// Keeps every delivered packet.
#[derive(Default)]
pub struct RecordingUpstream {
    packets: Mutex<Vec<(QueueId, RxPacket<PoolBuffer>)>>,
}

impl RecordingUpstream {
    pub fn count(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn take(&self) -> Vec<(QueueId, RxPacket<PoolBuffer>)> {
        core::mem::take(&mut *self.packets.lock())
    }
}

impl Upstream<PoolBuffer> for RecordingUpstream {
    fn deliver(&self, queue: QueueId, packet: RxPacket<PoolBuffer>) {
        self.packets.lock().push((queue, packet));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SIMULATED NIC
// ═══════════════════════════════════════════════════════════════════════════

/// Complete the next `n` outstanding transmit packets, oldest first.
pub fn complete_tx<P: TxPacket>(q: &mut TxQueue<P, AdvancedTxDescriptor>, n: usize) -> usize {
    let mut idx = q.next_to_clean();
    let mut done = 0;
    while done < n {
        let Some(eop) = q.ring.slot(idx).eop else {
            break;
        };
        if !q.ring.desc(eop).is_done() {
            q.ring.desc_mut(eop).complete();
            done += 1;
        }
        idx = q.ring.next(eop);
    }
    done
}

/// DMA `data` into the buffer posted at `index` and write back `wb`.
/// A zero `wb.length` is replaced by `data.len()`.
pub fn write_rx(q: &mut RxQueue<PoolBuffer, AdvancedRxDescriptor>, index: u16, data: &[u8], mut wb: RxWriteback) {
    let desc = q.ring.desc_mut(index);
    let addr = desc.lo.read();
    assert_ne!(addr, 0, "slot {} has no buffer posted", index);
    unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len()) };
    if wb.length == 0 {
        wb.length = data.len() as u16;
    }
    desc.write_back(&wb);
}

/// Receive side of the simulated NIC: owns a head pointer and only
/// writes descriptors the driver has published through the tail.
#[derive(Debug, Default)]
pub struct SimRx {
    head: u16,
}

impl SimRx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> u16 {
        self.head
    }

    /// Returns false when the ring has no descriptor to give.
    pub fn receive(
        &mut self,
        q: &mut RxQueue<PoolBuffer, AdvancedRxDescriptor>,
        device: &MockDevice,
        data: &[u8],
        wb: RxWriteback,
    ) -> bool {
        let tail = device.last_tail(q.id(), Direction::Rx).unwrap_or(0);
        if self.head == tail {
            return false;
        }
        write_rx(q, self.head, data, wb);
        self.head = q.ring.next(self.head);
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HEADERS
// ═══════════════════════════════════════════════════════════════════════════

fn ethernet(ethertype: u16, vlan: bool) -> Vec<u8> {
    let mut frame = vec![0x02, 0, 0, 0, 0, 0x01, 0x02, 0, 0, 0, 0, 0x02];
    if vlan {
        frame.extend_from_slice(&[0x81, 0x00, 0x00, 0x64]);
    }
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame
}

fn ipv4(protocol: u8) -> [u8; 20] {
    let mut ip = [0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&1500u16.to_be_bytes());
    ip[8] = 64;
    ip[9] = protocol;
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
    ip
}

fn tcp() -> [u8; 20] {
    let mut tcp = [0u8; 20];
    tcp[0..2].copy_from_slice(&40000u16.to_be_bytes());
    tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
    tcp[12] = 0x50;
    tcp[13] = 0x18;
    tcp
}

/// Ethernet (optionally tagged) + IPv4 + TCP, 20-byte L3 and L4 headers.
pub fn tcp4_headers(vlan: bool) -> Vec<u8> {
    let mut frame = ethernet(0x0800, vlan);
    frame.extend_from_slice(&ipv4(6));
    frame.extend_from_slice(&tcp());
    frame
}

/// Ethernet + IPv6 + TCP.
pub fn tcp6_headers() -> Vec<u8> {
    let mut frame = ethernet(0x86DD, false);
    let mut ip = [0u8; 40];
    ip[0] = 0x60;
    ip[4..6].copy_from_slice(&1460u16.to_be_bytes());
    ip[6] = 6;
    ip[7] = 64;
    ip[23] = 1;
    ip[39] = 2;
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&tcp());
    frame
}

/// Ethernet + IPv4 + UDP.
pub fn udp4_headers() -> Vec<u8> {
    let mut frame = ethernet(0x0800, false);
    frame.extend_from_slice(&ipv4(17));
    frame.extend_from_slice(&[0x13, 0x88, 0x13, 0x89, 0x05, 0xC8, 0x00, 0x00]);
    frame
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

pub type TestEngine = Engine<MockPlatform, MockDevice, RecordingUpstream>;

/// `queues` queues of `ring_size` descriptors, moderation on.
pub fn test_config(queues: usize, ring_size: u16) -> EngineConfig {
    let mut cfg = EngineConfig::new(queues).unwrap();
    for ring in &mut cfg.queues {
        *ring = RingConfig {
            ring_size,
            ..RingConfig::new()
        };
    }
    cfg
}

/// Engine over a fresh pool of `pool` buffers.
pub fn test_engine(queues: usize, ring_size: u16, pool: usize) -> TestEngine {
    Engine::new(
        test_config(queues, ring_size),
        MockPlatform::new(pool),
        MockDevice::default(),
        RecordingUpstream::default(),
    )
    .ok()
    .unwrap()
}
