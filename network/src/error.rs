//! Error types.
//!
//! Transmit errors hand the packet back on `Busy` so the caller can retry
//! or queue it. `Fatal` means the packet has already been released.

use core::fmt;

// ═══════════════════════════════════════════════════════════════════════════
// TRANSMIT
// ═══════════════════════════════════════════════════════════════════════════

/// Why a packet was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// Zero-length packet.
    Empty,
    /// Still too many segments after coalescing.
    TooManySegments,
    /// Coalescing itself failed.
    CoalesceFailed,
    /// Mapping rejected the packet outright.
    MapFailed,
    /// Requested offload cannot be applied to this packet.
    UnsupportedOffload,
    /// Queue is closed.
    QueueDown,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FatalReason::Empty => "empty packet",
            FatalReason::TooManySegments => "too many segments after coalesce",
            FatalReason::CoalesceFailed => "coalesce failed",
            FatalReason::MapFailed => "DMA mapping failed",
            FatalReason::UnsupportedOffload => "offload not applicable to packet",
            FatalReason::QueueDown => "queue is down",
        };
        f.write_str(s)
    }
}

/// Per-queue enqueue failure.
pub enum EnqueueError<P> {
    /// Transient shortage. The packet is returned untouched.
    Busy(P),
    /// The packet was dropped.
    Fatal(FatalReason),
}

impl<P> EnqueueError<P> {
    /// True for `Busy`.
    pub fn is_busy(&self) -> bool {
        matches!(self, EnqueueError::Busy(_))
    }

    /// Take the packet back out of a `Busy`.
    pub fn into_packet(self) -> Option<P> {
        match self {
            EnqueueError::Busy(p) => Some(p),
            EnqueueError::Fatal(_) => None,
        }
    }
}

impl<P> fmt::Debug for EnqueueError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Busy(_) => f.write_str("Busy(..)"),
            EnqueueError::Fatal(r) => f.debug_tuple("Fatal").field(r).finish(),
        }
    }
}

impl<P> fmt::Display for EnqueueError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Busy(_) => f.write_str("transmit ring busy"),
            EnqueueError::Fatal(r) => write!(f, "packet dropped: {}", r),
        }
    }
}

/// Multi-queue submit failure.
pub enum SubmitError<P> {
    /// Not accepted right now: the chosen queue's pending list is full,
    /// no queue is usable, or the device is wedged. The packet is
    /// returned.
    Busy(P),
    /// The packet was dropped.
    Fatal(FatalReason),
}

impl<P> SubmitError<P> {
    pub fn is_busy(&self) -> bool {
        matches!(self, SubmitError::Busy(_))
    }

    /// Take the packet back out of a `Busy`.
    pub fn into_packet(self) -> Option<P> {
        match self {
            SubmitError::Busy(p) => Some(p),
            SubmitError::Fatal(_) => None,
        }
    }
}

impl<P> fmt::Debug for SubmitError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Busy(_) => f.write_str("Busy(..)"),
            SubmitError::Fatal(r) => f.debug_tuple("Fatal").field(r).finish(),
        }
    }
}

impl<P> fmt::Display for SubmitError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Busy(_) => f.write_str("no room to queue packet"),
            SubmitError::Fatal(r) => write!(f, "packet dropped: {}", r),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DMA MAPPING
// ═══════════════════════════════════════════════════════════════════════════

/// Mapping failure reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Out of mapping resources right now; retry later.
    NoResources,
    /// Needs more segments than allowed; coalescing may help.
    TooManySegments,
    /// Cannot be mapped at all.
    Invalid,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::NoResources => f.write_str("out of mapping resources"),
            MapError::TooManySegments => f.write_str("too many segments"),
            MapError::Invalid => f.write_str("unmappable"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION / SETUP
// ═══════════════════════════════════════════════════════════════════════════

/// Invalid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Queue count is zero or above the limit.
    QueueCount(usize),
    /// No such queue.
    UnknownQueue(u16),
    /// Ring size is not a multiple of 8 within bounds.
    RingSize(u16),
    /// Copy threshold exceeds the receive buffer size.
    CopyThreshold {
        /// Configured threshold.
        threshold: usize,
        /// Receive buffer size.
        buffer: usize,
    },
    /// A limit that must be positive is zero.
    ZeroLimit(&'static str),
    /// Moderation bounds are inverted.
    ModerationBounds {
        /// Lower bound.
        min: u32,
        /// Upper bound.
        max: u32,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::QueueCount(n) => write!(f, "invalid queue count {}", n),
            ConfigError::UnknownQueue(q) => write!(f, "no queue {}", q),
            ConfigError::RingSize(n) => write!(f, "invalid ring size {}", n),
            ConfigError::CopyThreshold { threshold, buffer } => write!(
                f,
                "copy threshold {} exceeds buffer size {}",
                threshold, buffer
            ),
            ConfigError::ZeroLimit(what) => write!(f, "{} must be non-zero", what),
            ConfigError::ModerationBounds { min, max } => {
                write!(f, "moderation bounds inverted ({} > {})", min, max)
            }
        }
    }
}

/// Ring setup failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    /// Bad configuration.
    Config(ConfigError),
    /// Could not populate the receive ring.
    OutOfBuffers {
        /// Slots populated before running out.
        populated: usize,
    },
    /// Receive buffer could not be mapped.
    Map(MapError),
}

impl From<ConfigError> for SetupError {
    fn from(e: ConfigError) -> Self {
        SetupError::Config(e)
    }
}

impl From<MapError> for SetupError {
    fn from(e: MapError) -> Self {
        SetupError::Map(e)
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Config(e) => write!(f, "config: {}", e),
            SetupError::OutOfBuffers { populated } => {
                write!(f, "out of receive buffers after {} slots", populated)
            }
            SetupError::Map(e) => write!(f, "receive buffer map: {}", e),
        }
    }
}
