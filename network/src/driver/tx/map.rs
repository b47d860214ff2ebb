//! Transmit mapping with a single coalesce retry.
//!
//! The retry budget lives in the types: a [`Fresh`] packet may come back
//! as [`Coalesced`] for one more attempt, and a `Coalesced` packet's
//! `map` has no retry outcome at all.

use crate::dma::{DmaMapping, DmaPlatform};
use crate::error::{FatalReason, MapError};
use crate::stats::{bump, QueueCounters};
use crate::types::TxPacket;

/// A packet with its live mapping.
pub(crate) struct Mapped<P> {
    pub packet: P,
    pub mapping: DmaMapping,
}

/// Mapping gave up.
pub(crate) enum MapFailure<P> {
    /// Transient; the packet is handed back.
    Busy(P),
    /// The packet was dropped.
    Fatal(FatalReason),
}

struct Fresh<P>(P);

struct Coalesced<P>(P);

enum FirstAttempt<P> {
    Mapped(Mapped<P>),
    Retry(Coalesced<P>),
}

/// Map, enforcing the segment limit even if the platform does not.
fn try_map<D: DmaPlatform>(platform: &D, packet: &D::Packet, max_segments: usize) -> Result<DmaMapping, MapError> {
    let mapping = platform.map_packet(packet, max_segments)?;
    if mapping.is_empty() {
        platform.unmap(mapping);
        return Err(MapError::Invalid);
    }
    if mapping.len() > max_segments {
        platform.unmap(mapping);
        return Err(MapError::TooManySegments);
    }
    Ok(mapping)
}

impl<P: TxPacket> Fresh<P> {
    fn map<D>(self, platform: &D, max_segments: usize, counters: &QueueCounters) -> Result<FirstAttempt<P>, MapFailure<P>>
    where
        D: DmaPlatform<Packet = P>,
    {
        match try_map(platform, &self.0, max_segments) {
            Ok(mapping) => Ok(FirstAttempt::Mapped(Mapped {
                packet: self.0,
                mapping,
            })),
            Err(MapError::TooManySegments) => match platform.coalesce(self.0) {
                Ok(packet) => {
                    bump(&counters.tx_coalesced);
                    Ok(FirstAttempt::Retry(Coalesced(packet)))
                }
                Err(packet) => {
                    bump(&counters.tx_coalesce_failed);
                    drop(packet);
                    Err(MapFailure::Fatal(FatalReason::CoalesceFailed))
                }
            },
            Err(MapError::NoResources) => Err(MapFailure::Busy(self.0)),
            Err(MapError::Invalid) => Err(MapFailure::Fatal(FatalReason::MapFailed)),
        }
    }
}

impl<P: TxPacket> Coalesced<P> {
    fn map<D>(self, platform: &D, max_segments: usize, counters: &QueueCounters) -> Result<Mapped<P>, MapFailure<P>>
    where
        D: DmaPlatform<Packet = P>,
    {
        match try_map(platform, &self.0, max_segments) {
            Ok(mapping) => Ok(Mapped {
                packet: self.0,
                mapping,
            }),
            Err(MapError::TooManySegments) => {
                bump(&counters.tx_coalesce_failed);
                Err(MapFailure::Fatal(FatalReason::TooManySegments))
            }
            Err(MapError::NoResources) => Err(MapFailure::Busy(self.0)),
            Err(MapError::Invalid) => Err(MapFailure::Fatal(FatalReason::MapFailed)),
        }
    }
}

/// Map `packet` for transmit, coalescing at most once.
pub(crate) fn map_for_transmit<D>(
    packet: D::Packet,
    platform: &D,
    max_segments: usize,
    counters: &QueueCounters,
) -> Result<Mapped<D::Packet>, MapFailure<D::Packet>>
where
    D: DmaPlatform,
{
    match Fresh(packet).map(platform, max_segments, counters)? {
        FirstAttempt::Mapped(mapped) => Ok(mapped),
        FirstAttempt::Retry(coalesced) => coalesced.map(platform, max_segments, counters),
    }
}
