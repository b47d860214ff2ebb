//! Engine configuration.
//!
//! Plain structs with `new()` defaults. Everything is validated once in
//! [`EngineConfig::validate`] before any ring is built.

use alloc::vec::Vec;

use crate::error::ConfigError;
use crate::types::{OffloadFlags, QueueId, MAX_QUEUES};

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

/// Default descriptors per ring.
pub const DEFAULT_RING_SIZE: u16 = 1024;
/// Ring sizes must be a multiple of this.
pub const RING_SIZE_ALIGN: u16 = 8;
/// Smallest ring.
pub const MIN_RING_SIZE: u16 = 8;
/// Largest ring.
pub const MAX_RING_SIZE: u16 = 4096;
/// Receive buffer size.
pub const DEFAULT_RX_BUFFER_SIZE: usize = 2048;
/// Received packets at or below this length are copied into a small buffer.
pub const DEFAULT_RX_COPY_THRESHOLD: usize = 160;
/// Descriptors handled per RX poll / packets per TX reap.
pub const DEFAULT_PROCESS_LIMIT: usize = 256;
/// Maximum DMA segments per transmit packet.
pub const DEFAULT_MAX_SEGMENTS: usize = 32;
/// Pending-list capacity per queue.
pub const DEFAULT_PENDING_CAPACITY: usize = 4096;
/// Consecutive no-progress watchdog ticks before a queue is declared hung.
pub const DEFAULT_STALL_THRESHOLD: u32 = 10;

// ═══════════════════════════════════════════════════════════════════════════
// RING
// ═══════════════════════════════════════════════════════════════════════════

/// Per-queue ring configuration.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Descriptors in each of the TX and RX rings.
    pub ring_size: u16,
    /// Offloads enabled on this queue.
    pub offload: OffloadFlags,
    /// Size of each receive buffer.
    pub rx_buffer_size: usize,
    /// Copy threshold for small received packets.
    pub rx_copy_threshold: usize,
    /// Descriptors consumed per RX poll.
    pub rx_process_limit: usize,
    /// Packets reclaimed per TX reap.
    pub tx_process_limit: usize,
    /// Segment limit per transmit packet.
    pub max_segments: usize,
    /// Pending-list capacity.
    pub pending_capacity: usize,
    /// Device wants a context descriptor in front of every packet.
    pub needs_context: bool,
}

impl RingConfig {
    /// Configuration with default values.
    pub fn new() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            offload: OffloadFlags::empty(),
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            rx_copy_threshold: DEFAULT_RX_COPY_THRESHOLD,
            rx_process_limit: DEFAULT_PROCESS_LIMIT,
            tx_process_limit: DEFAULT_PROCESS_LIMIT,
            max_segments: DEFAULT_MAX_SEGMENTS,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            needs_context: false,
        }
    }

    /// Free-slot level below which a transmit drain reaps first.
    pub fn tx_cleanup_threshold(&self) -> u16 {
        self.ring_size / 8
    }

    /// Check bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ring_size(self.ring_size)?;
        if self.rx_copy_threshold > self.rx_buffer_size {
            return Err(ConfigError::CopyThreshold {
                threshold: self.rx_copy_threshold,
                buffer: self.rx_buffer_size,
            });
        }
        if self.rx_buffer_size == 0 {
            return Err(ConfigError::ZeroLimit("rx_buffer_size"));
        }
        if self.rx_process_limit == 0 {
            return Err(ConfigError::ZeroLimit("rx_process_limit"));
        }
        if self.tx_process_limit == 0 {
            return Err(ConfigError::ZeroLimit("tx_process_limit"));
        }
        if self.max_segments == 0 {
            return Err(ConfigError::ZeroLimit("max_segments"));
        }
        if self.pending_capacity == 0 {
            return Err(ConfigError::ZeroLimit("pending_capacity"));
        }
        Ok(())
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_ring_size(size: u16) -> Result<(), ConfigError> {
    if !(MIN_RING_SIZE..=MAX_RING_SIZE).contains(&size) || size % RING_SIZE_ALIGN != 0 {
        return Err(ConfigError::RingSize(size));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// MODERATION
// ═══════════════════════════════════════════════════════════════════════════

/// Adaptive interrupt moderation parameters.
///
/// Delay values are in the device's interrupt-throttle units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModerationConfig {
    /// Recompute the delay on every interrupt.
    pub enabled: bool,
    /// Bytes added to the average frame size for preamble and gaps.
    pub frame_overhead: u32,
    /// Cap on the raw average frame size.
    pub upper_bound: u32,
    /// Averages strictly inside this band are divided by 3, others by 2.
    pub mid_band: (u32, u32),
    /// Smallest delay ever written.
    pub min_delay: u32,
    /// Largest delay ever written.
    pub max_delay: u32,
}

impl ModerationConfig {
    /// Configuration with default values.
    pub const fn new() -> Self {
        Self {
            enabled: true,
            frame_overhead: 24,
            upper_bound: 3000,
            mid_band: (300, 1200),
            min_delay: 0x48,
            max_delay: 1500,
        }
    }

    /// Moderation turned off; the device keeps its static delay.
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// Check bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay > self.max_delay {
            return Err(ConfigError::ModerationBounds {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        if self.mid_band.0 > self.mid_band.1 {
            return Err(ConfigError::ModerationBounds {
                min: self.mid_band.0,
                max: self.mid_band.1,
            });
        }
        Ok(())
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WATCHDOG
// ═══════════════════════════════════════════════════════════════════════════

/// Stall watchdog parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Consecutive no-progress ticks before a queue is hung.
    pub stall_threshold: u32,
}

impl WatchdogConfig {
    /// Configuration with default values.
    pub const fn new() -> Self {
        Self {
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Whole-engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// One entry per queue pair.
    pub queues: Vec<RingConfig>,
    /// Interrupt moderation.
    pub moderation: ModerationConfig,
    /// Stall detection.
    pub watchdog: WatchdogConfig,
}

impl EngineConfig {
    /// `num_queues` queue pairs, all with default ring settings.
    pub fn new(num_queues: usize) -> Result<Self, ConfigError> {
        if num_queues == 0 || num_queues > MAX_QUEUES {
            return Err(ConfigError::QueueCount(num_queues));
        }
        Ok(Self {
            queues: (0..num_queues).map(|_| RingConfig::new()).collect(),
            moderation: ModerationConfig::new(),
            watchdog: WatchdogConfig::new(),
        })
    }

    /// Set ring size and offloads of one queue.
    pub fn configure(
        &mut self,
        queue: QueueId,
        ring_size: u16,
        offload: OffloadFlags,
    ) -> Result<(), ConfigError> {
        validate_ring_size(ring_size)?;
        let ring = self
            .queues
            .get_mut(queue.index())
            .ok_or(ConfigError::UnknownQueue(queue.0))?;
        ring.ring_size = ring_size;
        ring.offload = offload;
        Ok(())
    }

    /// Settings of one queue.
    pub fn ring(&self, queue: QueueId) -> Option<&RingConfig> {
        self.queues.get(queue.index())
    }

    /// Number of queue pairs.
    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    /// Check every part.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() || self.queues.len() > MAX_QUEUES {
            return Err(ConfigError::QueueCount(self.queues.len()));
        }
        for ring in &self.queues {
            ring.validate()?;
        }
        self.moderation.validate()?;
        if self.watchdog.stall_threshold == 0 {
            return Err(ConfigError::ZeroLimit("stall_threshold"));
        }
        Ok(())
    }
}
