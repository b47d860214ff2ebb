//! Descriptor formats.
//!
//! Rings are generic over a [`DescriptorFamily`]: the ring logic only
//! ever asks a descriptor to be written in a decoded form
//! ([`ContextFields`], [`DataCommand`]) or to report a decoded
//! [`RxWriteback`]. Bit layouts live with each family.

pub mod advanced;

pub use advanced::{Advanced, AdvancedRxDescriptor, AdvancedTxDescriptor};

use crate::types::Segment;

// ═══════════════════════════════════════════════════════════════════════════
// TRANSMIT
// ═══════════════════════════════════════════════════════════════════════════

/// Layer-4 protocol named in a context descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum L4Kind {
    /// No L4 offload.
    #[default]
    None,
    Tcp,
    Udp,
}

/// Decoded transmit context (offload state for the following packet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextFields {
    /// 802.1Q tag to insert, 0 if none.
    pub vlan_tag: u16,
    /// L2 header length.
    pub mac_len: u8,
    /// L3 header length.
    pub ip_len: u16,
    /// L3 is IPv4.
    pub ipv4: bool,
    /// L4 protocol.
    pub l4: L4Kind,
    /// L4 header length (TSO only).
    pub l4_len: u8,
    /// Segment size (TSO only).
    pub mss: u16,
}

/// Per-descriptor command for a transmit data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataCommand {
    /// Last descriptor of the packet.
    pub end_of_packet: bool,
    /// Ask the device to write back completion status.
    pub report_status: bool,
    /// Insert the VLAN tag from the context.
    pub vlan: bool,
    /// Segment the packet (TSO).
    pub tso: bool,
    /// Insert the IPv4 header checksum.
    pub ip_csum: bool,
    /// Insert the L4 checksum.
    pub l4_csum: bool,
    /// Payload length reported to the device.
    pub payload_len: u32,
}

/// A transmit descriptor.
pub trait TxDescriptor: Send {
    /// A zeroed descriptor.
    fn blank() -> Self;

    /// Zero the descriptor.
    fn clear(&mut self);

    /// Write a context descriptor.
    fn write_context(&mut self, ctx: &ContextFields);

    /// Write a data descriptor for one segment.
    fn write_data(&mut self, segment: Segment, cmd: &DataCommand);

    /// Device has completed this descriptor.
    fn is_done(&self) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════
// RECEIVE
// ═══════════════════════════════════════════════════════════════════════════

/// Decoded receive write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxWriteback {
    /// Bytes written to this descriptor's buffer.
    pub length: u16,
    /// Last descriptor of the packet.
    pub end_of_packet: bool,
    /// Frame error (CRC, length, symbol...).
    pub frame_error: bool,
    /// Tag stripped by the device.
    pub vlan: Option<u16>,
    /// Device checked the IPv4 checksum.
    pub ip_checked: bool,
    /// IPv4 checksum was wrong.
    pub ip_error: bool,
    /// Device checked the L4 checksum.
    pub l4_checked: bool,
    /// L4 checksum was wrong.
    pub l4_error: bool,
    /// Coalesced-receive descriptor count (0 when not coalescing).
    pub rsc_count: u8,
    /// Slot holding the next fragment when `rsc_count > 0`.
    pub next_index: u16,
    /// Device packet-type field.
    pub packet_type: u16,
}

/// A receive descriptor.
pub trait RxDescriptor: Send {
    /// A zeroed descriptor.
    fn blank() -> Self;

    /// Hand a buffer at `addr` to the device.
    fn post(&mut self, addr: u64);

    /// Decoded write-back, or `None` while the device still owns it.
    fn writeback(&self) -> Option<RxWriteback>;

    /// Clear the done status so the write-back is not seen twice.
    fn clear_status(&mut self);
}

/// A matched pair of descriptor formats.
pub trait DescriptorFamily: Send + Sync + 'static {
    /// Transmit descriptor.
    type Tx: TxDescriptor;
    /// Receive descriptor.
    type Rx: RxDescriptor;
    /// Name for logs.
    const NAME: &'static str;
}
