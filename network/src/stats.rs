//! Per-queue counters.
//!
//! Everything is a relaxed atomic: counters are advisory and may be read
//! from any CPU while the queue is being serviced elsewhere.

use core::sync::atomic::{AtomicU64, Ordering};

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

/// Event counters for one queue pair.
#[derive(Debug, Default)]
pub struct QueueCounters {
    /// Packets posted to the TX ring.
    pub tx_enqueued: AtomicU64,
    /// Packets reclaimed after the device sent them.
    pub tx_completed: AtomicU64,
    /// Bytes reclaimed after the device sent them.
    pub tx_bytes: AtomicU64,
    /// Enqueue refused for lack of slots or mapping resources.
    pub tx_busy: AtomicU64,
    /// Packets dropped on a fatal enqueue error.
    pub tx_dropped: AtomicU64,
    /// Successful coalesce retries.
    pub tx_coalesced: AtomicU64,
    /// Coalesce attempts that failed or still mapped too many segments.
    pub tx_coalesce_failed: AtomicU64,
    /// Context descriptors written.
    pub tx_contexts: AtomicU64,
    /// TSO packets posted.
    pub tx_tso: AtomicU64,
    /// Submits refused because the pending list was full.
    pub pending_full: AtomicU64,
    /// Pending packets dropped at teardown.
    pub pending_dropped: AtomicU64,
    /// Packets delivered upstream.
    pub rx_delivered: AtomicU64,
    /// Bytes delivered upstream.
    pub rx_bytes: AtomicU64,
    /// Packets discarded on a descriptor error.
    pub rx_discarded: AtomicU64,
    /// Packets delivered through the small-copy path.
    pub rx_copied: AtomicU64,
    /// Refill stopped for lack of a buffer.
    pub rx_no_buffer: AtomicU64,
    /// Packets with a bad IP or L4 checksum.
    pub rx_csum_bad: AtomicU64,
    /// Interrupts serviced.
    pub interrupts: AtomicU64,
    /// Deferred work items run.
    pub deferred: AtomicU64,
}

/// Point-in-time copy of [`QueueCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub tx_enqueued: u64,
    pub tx_completed: u64,
    pub tx_bytes: u64,
    pub tx_busy: u64,
    pub tx_dropped: u64,
    pub tx_coalesced: u64,
    pub tx_coalesce_failed: u64,
    pub tx_contexts: u64,
    pub tx_tso: u64,
    pub pending_full: u64,
    pub pending_dropped: u64,
    pub rx_delivered: u64,
    pub rx_bytes: u64,
    pub rx_discarded: u64,
    pub rx_copied: u64,
    pub rx_no_buffer: u64,
    pub rx_csum_bad: u64,
    pub interrupts: u64,
    pub deferred: u64,
}

impl QueueCounters {
    /// All zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every counter.
    pub fn snapshot(&self) -> CounterSnapshot {
        let r = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            tx_enqueued: r(&self.tx_enqueued),
            tx_completed: r(&self.tx_completed),
            tx_bytes: r(&self.tx_bytes),
            tx_busy: r(&self.tx_busy),
            tx_dropped: r(&self.tx_dropped),
            tx_coalesced: r(&self.tx_coalesced),
            tx_coalesce_failed: r(&self.tx_coalesce_failed),
            tx_contexts: r(&self.tx_contexts),
            tx_tso: r(&self.tx_tso),
            pending_full: r(&self.pending_full),
            pending_dropped: r(&self.pending_dropped),
            rx_delivered: r(&self.rx_delivered),
            rx_bytes: r(&self.rx_bytes),
            rx_discarded: r(&self.rx_discarded),
            rx_copied: r(&self.rx_copied),
            rx_no_buffer: r(&self.rx_no_buffer),
            rx_csum_bad: r(&self.rx_csum_bad),
            interrupts: r(&self.interrupts),
            deferred: r(&self.deferred),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRAFFIC (moderation input)
// ═══════════════════════════════════════════════════════════════════════════

/// Byte and packet totals since the last moderation recompute.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    pub tx_bytes: AtomicU64,
    pub tx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub rx_packets: AtomicU64,
}

/// Totals taken out of [`TrafficCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrafficSample {
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub rx_packets: u64,
}

impl TrafficSample {
    /// No bytes moved in either direction.
    pub fn is_idle(&self) -> bool {
        self.tx_bytes == 0 && self.rx_bytes == 0
    }
}

impl TrafficCounters {
    /// All zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account completed transmits.
    pub fn record_tx(&self, bytes: u64, packets: u64) {
        add(&self.tx_bytes, bytes);
        add(&self.tx_packets, packets);
    }

    /// Account one delivered packet.
    pub fn record_rx(&self, bytes: u64) {
        add(&self.rx_bytes, bytes);
        bump(&self.rx_packets);
    }

    /// Read without resetting.
    pub fn peek(&self) -> TrafficSample {
        TrafficSample {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
        }
    }

    /// Read and zero.
    pub fn take(&self) -> TrafficSample {
        TrafficSample {
            tx_bytes: self.tx_bytes.swap(0, Ordering::Relaxed),
            tx_packets: self.tx_packets.swap(0, Ordering::Relaxed),
            rx_bytes: self.rx_bytes.swap(0, Ordering::Relaxed),
            rx_packets: self.rx_packets.swap(0, Ordering::Relaxed),
        }
    }
}
