//! 82599-style advanced descriptors.
//!
//! Each descriptor is two little-endian quadwords. The meaning of each
//! half depends on the form:
//!
//! ```text
//! TX data     lo = buffer address
//!             hi = cmd_type_len[31:0]     | olinfo_status[63:32]
//! TX context  lo = vlan_macip_lens[31:0]  | seqnum_seed[63:32]
//!             hi = type_tucmd_mlhl[31:0]  | mss_l4len_idx[63:32]
//! TX wb       hi bit 32 = DD
//! RX read     lo = packet buffer address, hi = header buffer address
//! RX wb       lo = pkt_info[31:0]         | rss hash[63:32]
//!             hi = status_error[31:0]     | length[47:32] | vlan[63:48]
//! ```
//!
//! # Reference
//! Intel 82599 datasheet §7.1.6 (RX), §7.2.3 (TX).

use core::fmt;

use bit_field::BitField;
use bitflags::bitflags;
use volatile::Volatile;

use super::{ContextFields, DataCommand, DescriptorFamily, L4Kind, RxDescriptor, RxWriteback, TxDescriptor};
use crate::types::Segment;

// ═══════════════════════════════════════════════════════════════════════════
// TX BITS
// ═══════════════════════════════════════════════════════════════════════════

bitflags! {
    /// `cmd_type_len` bits of a data descriptor.
    pub struct TxCmd: u32 {
        const DTYP_DATA = 0x0030_0000;
        const EOP       = 0x0100_0000;
        const IFCS      = 0x0200_0000;
        const RS        = 0x0800_0000;
        const DEXT      = 0x2000_0000;
        const VLE       = 0x4000_0000;
        const TSE       = 0x8000_0000;
    }
}

/// Data length field of `cmd_type_len`.
pub const TXD_DTALEN_MASK: u32 = 0x0000_FFFF;
/// Context descriptor type.
pub const TXD_DTYP_CTXT: u32 = 0x0020_0000;

/// Check-context bit of `olinfo_status`.
pub const TXD_OLINFO_CC: u32 = 0x0000_0080;
/// Insert IP checksum.
pub const TXD_POPTS_IXSM: u32 = 0x01 << 8;
/// Insert L4 checksum.
pub const TXD_POPTS_TXSM: u32 = 0x02 << 8;
/// Payload length position in `olinfo_status`.
pub const TXD_PAYLEN_SHIFT: u32 = 14;
/// Payload length width.
pub const TXD_PAYLEN_MASK: u32 = 0x3FFFF;

/// VLAN tag position in `vlan_macip_lens`.
pub const TXD_VLAN_SHIFT: u32 = 16;
/// MAC header length position in `vlan_macip_lens`.
pub const TXD_MACLEN_SHIFT: u32 = 9;
/// IP header length field of `vlan_macip_lens`.
pub const TXD_IPLEN_MASK: u32 = 0x1FF;

/// L3 is IPv4 (IPv6 is zero).
pub const TXD_TUCMD_IPV4: u32 = 0x0000_0400;
/// L4 is TCP.
pub const TXD_TUCMD_L4T_TCP: u32 = 0x0000_0800;
/// L4 is UDP.
pub const TXD_TUCMD_L4T_UDP: u32 = 0x0000_0000;

/// MSS position in `mss_l4len_idx`.
pub const TXD_MSS_SHIFT: u32 = 16;
/// L4 header length position in `mss_l4len_idx`.
pub const TXD_L4LEN_SHIFT: u32 = 8;

/// Done bit, in the upper quadword.
const TXD_STAT_DD_BIT: u8 = 32;

// ═══════════════════════════════════════════════════════════════════════════
// RX BITS
// ═══════════════════════════════════════════════════════════════════════════

bitflags! {
    /// Status half of `status_error`.
    pub struct RxStatus: u32 {
        const DD    = 0x01;
        const EOP   = 0x02;
        const VP    = 0x08;
        const UDPCS = 0x10;
        const L4CS  = 0x20;
        const IPCS  = 0x40;
    }
}

bitflags! {
    /// Error half of `status_error`.
    pub struct RxError: u32 {
        const CE   = 0x0100_0000;
        const LE   = 0x0200_0000;
        const PE   = 0x0800_0000;
        const OSE  = 0x1000_0000;
        const USE  = 0x2000_0000;
        const TCPE = 0x4000_0000;
        const IPE  = 0x8000_0000;

        /// Any frame-level error: the packet is garbage.
        const FRAME = Self::CE.bits | Self::LE.bits | Self::PE.bits | Self::OSE.bits | Self::USE.bits;
    }
}

/// Next-descriptor pointer for coalesced receives (status bits 4..20).
const RXD_NEXTP_BITS: core::ops::Range<u8> = 4..20;
/// Coalesced descriptor count in `pkt_info` (bits 17..21).
const RXD_RSCCNT_BITS: core::ops::Range<u8> = 17..21;
/// Packet type in `pkt_info` (bits 4..17).
const RXD_PKTTYPE_BITS: core::ops::Range<u8> = 4..17;

// ═══════════════════════════════════════════════════════════════════════════
// TX DESCRIPTOR
// ═══════════════════════════════════════════════════════════════════════════

/// Advanced transmit descriptor (data or context form).
#[repr(C)]
pub struct AdvancedTxDescriptor {
    /// Buffer address, or `vlan_macip_lens | seqnum_seed`.
    pub lo: Volatile<u64>,
    /// `cmd_type_len | olinfo_status`, or `type_tucmd_mlhl | mss_l4len_idx`.
    pub hi: Volatile<u64>,
}

impl AdvancedTxDescriptor {
    /// `cmd_type_len` half.
    pub fn cmd_type_len(&self) -> u32 {
        self.hi.read().get_bits(0..32) as u32
    }

    /// `olinfo_status` half.
    pub fn olinfo_status(&self) -> u32 {
        self.hi.read().get_bits(32..64) as u32
    }

    /// Command bits of a data descriptor.
    pub fn cmd(&self) -> TxCmd {
        TxCmd::from_bits_truncate(self.cmd_type_len())
    }

    /// Buffer address of a data descriptor.
    pub fn buffer_addr(&self) -> u64 {
        self.lo.read()
    }

    /// `vlan_macip_lens` of a context descriptor.
    pub fn vlan_macip_lens(&self) -> u32 {
        self.lo.read().get_bits(0..32) as u32
    }

    /// `type_tucmd_mlhl` of a context descriptor.
    pub fn type_tucmd_mlhl(&self) -> u32 {
        self.hi.read().get_bits(0..32) as u32
    }

    /// `mss_l4len_idx` of a context descriptor.
    pub fn mss_l4len_idx(&self) -> u32 {
        self.hi.read().get_bits(32..64) as u32
    }

    /// Device side: write back completion.
    #[cfg(test)]
    pub(crate) fn complete(&mut self) {
        self.hi.update(|v| {
            v.set_bit(TXD_STAT_DD_BIT, true);
        });
    }
}

impl TxDescriptor for AdvancedTxDescriptor {
    fn blank() -> Self {
        Self {
            lo: Volatile::new(0),
            hi: Volatile::new(0),
        }
    }

    fn clear(&mut self) {
        self.lo.write(0);
        self.hi.write(0);
    }

    fn write_context(&mut self, ctx: &ContextFields) {
        let vlan_macip_lens = ((ctx.vlan_tag as u32) << TXD_VLAN_SHIFT)
            | ((ctx.mac_len as u32) << TXD_MACLEN_SHIFT)
            | (ctx.ip_len as u32 & TXD_IPLEN_MASK);

        let mut type_tucmd_mlhl = TxCmd::DEXT.bits() | TXD_DTYP_CTXT;
        if ctx.ipv4 {
            type_tucmd_mlhl |= TXD_TUCMD_IPV4;
        }
        type_tucmd_mlhl |= match ctx.l4 {
            L4Kind::Tcp => TXD_TUCMD_L4T_TCP,
            L4Kind::Udp | L4Kind::None => TXD_TUCMD_L4T_UDP,
        };

        let mss_l4len_idx =
            ((ctx.mss as u32) << TXD_MSS_SHIFT) | ((ctx.l4_len as u32) << TXD_L4LEN_SHIFT);

        self.lo.write(vlan_macip_lens as u64);
        self.hi
            .write(type_tucmd_mlhl as u64 | ((mss_l4len_idx as u64) << 32));
    }

    fn write_data(&mut self, segment: Segment, cmd: &DataCommand) {
        let mut flags = TxCmd::DTYP_DATA | TxCmd::IFCS | TxCmd::DEXT;
        flags.set(TxCmd::EOP, cmd.end_of_packet);
        flags.set(TxCmd::RS, cmd.report_status);
        flags.set(TxCmd::VLE, cmd.vlan);
        flags.set(TxCmd::TSE, cmd.tso);
        let cmd_type_len = flags.bits() | (segment.len & TXD_DTALEN_MASK);

        let mut olinfo = TXD_OLINFO_CC | ((cmd.payload_len & TXD_PAYLEN_MASK) << TXD_PAYLEN_SHIFT);
        if cmd.ip_csum {
            olinfo |= TXD_POPTS_IXSM;
        }
        if cmd.l4_csum {
            olinfo |= TXD_POPTS_TXSM;
        }

        self.lo.write(segment.addr);
        self.hi.write(cmd_type_len as u64 | ((olinfo as u64) << 32));
    }

    fn is_done(&self) -> bool {
        self.hi.read().get_bit(TXD_STAT_DD_BIT)
    }
}

impl fmt::Debug for AdvancedTxDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{lo: {:#x}, hi: {:#x}}}", self.lo.read(), self.hi.read())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RX DESCRIPTOR
// ═══════════════════════════════════════════════════════════════════════════

/// Advanced receive descriptor (read or write-back form).
#[repr(C)]
pub struct AdvancedRxDescriptor {
    /// Packet buffer address, or `pkt_info | rss`.
    pub lo: Volatile<u64>,
    /// Header buffer address, or `status_error | length | vlan`.
    pub hi: Volatile<u64>,
}

impl AdvancedRxDescriptor {
    /// `status_error` half.
    pub fn status_error(&self) -> u32 {
        self.hi.read().get_bits(0..32) as u32
    }

    /// Device side: write back a completed receive.
    #[cfg(test)]
    pub(crate) fn write_back(&mut self, wb: &RxWriteback) {
        let mut status = RxStatus::DD;
        status.set(RxStatus::EOP, wb.end_of_packet);
        status.set(RxStatus::VP, wb.vlan.is_some());
        status.set(RxStatus::IPCS, wb.ip_checked);
        status.set(RxStatus::L4CS, wb.l4_checked);
        let mut status_error = status.bits();
        if !wb.end_of_packet && wb.rsc_count > 0 {
            status_error.set_bits(RXD_NEXTP_BITS, wb.next_index as u32);
        }
        let mut errors = RxError::empty();
        errors.set(RxError::CE, wb.frame_error);
        errors.set(RxError::IPE, wb.ip_error);
        errors.set(RxError::TCPE, wb.l4_error);
        status_error |= errors.bits();

        let mut pkt_info: u32 = 0;
        pkt_info.set_bits(RXD_PKTTYPE_BITS, wb.packet_type as u32);
        pkt_info.set_bits(RXD_RSCCNT_BITS, wb.rsc_count as u32);

        let mut hi = status_error as u64;
        hi.set_bits(32..48, wb.length as u64);
        hi.set_bits(48..64, wb.vlan.unwrap_or(0) as u64);
        self.lo.write(pkt_info as u64);
        self.hi.write(hi);
    }
}

impl RxDescriptor for AdvancedRxDescriptor {
    fn blank() -> Self {
        Self {
            lo: Volatile::new(0),
            hi: Volatile::new(0),
        }
    }

    fn post(&mut self, addr: u64) {
        self.lo.write(addr);
        // Header split is off; a zero header address also clears DD.
        self.hi.write(0);
    }

    fn writeback(&self) -> Option<RxWriteback> {
        let hi = self.hi.read();
        let status_error = hi.get_bits(0..32) as u32;
        let status = RxStatus::from_bits_truncate(status_error);
        if !status.contains(RxStatus::DD) {
            return None;
        }
        let errors = RxError::from_bits_truncate(status_error);
        let pkt_info = self.lo.read().get_bits(0..32) as u32;
        let eop = status.contains(RxStatus::EOP);
        let rsc_count = pkt_info.get_bits(RXD_RSCCNT_BITS) as u8;

        Some(RxWriteback {
            length: hi.get_bits(32..48) as u16,
            end_of_packet: eop,
            frame_error: errors.intersects(RxError::FRAME),
            vlan: if status.contains(RxStatus::VP) {
                Some(hi.get_bits(48..64) as u16)
            } else {
                None
            },
            // Checksum bits share space with NEXTP; only meaningful on EOP.
            ip_checked: eop && status.contains(RxStatus::IPCS),
            ip_error: eop && errors.contains(RxError::IPE),
            l4_checked: eop && status.contains(RxStatus::L4CS),
            l4_error: eop && errors.contains(RxError::TCPE),
            rsc_count,
            next_index: if !eop && rsc_count > 0 {
                status_error.get_bits(RXD_NEXTP_BITS) as u16
            } else {
                0
            },
            packet_type: pkt_info.get_bits(RXD_PKTTYPE_BITS) as u16,
        })
    }

    fn clear_status(&mut self) {
        self.hi.update(|v| {
            v.set_bits(0..32, 0);
        });
    }
}

impl fmt::Debug for AdvancedRxDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{lo: {:#x}, hi: {:#x}}}", self.lo.read(), self.hi.read())
    }
}

/// The 82599 advanced descriptor pair.
#[derive(Debug, Clone, Copy)]
pub struct Advanced;

impl DescriptorFamily for Advanced {
    type Tx = AdvancedTxDescriptor;
    type Rx = AdvancedRxDescriptor;
    const NAME: &'static str = "advanced";
}
