//! Transmit offload planning.
//!
//! Pure functions: header bytes and a request go in, the context
//! descriptor (if any) and the per-descriptor command template come out.
//! Nothing here touches a ring.

use smoltcp::wire::{EthernetFrame, IpProtocol, Ipv4Packet, Ipv6Packet, TcpPacket};

use crate::descriptor::{ContextFields, DataCommand, L4Kind};
use crate::error::FatalReason;
use crate::types::{OffloadFlags, TxOffloadRequest};

/// Ethernet header length.
pub const ETH_HLEN: u8 = 14;
/// 802.1Q tag length.
pub const VLAN_HLEN: u8 = 4;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;

const IPV4_MIN_HLEN: usize = 20;
const IPV6_HLEN: usize = 40;
const TCP_MIN_HLEN: usize = 20;
const UDP_HLEN: u8 = 8;

/// Network layer of a parsed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3Kind {
    Ipv4,
    Ipv6,
    Other,
}

/// Header lengths and protocols found at the front of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    /// L2 header length, including an in-frame VLAN tag.
    pub mac_len: u8,
    /// L3 protocol.
    pub l3: L3Kind,
    /// L3 header length (0 for `Other`).
    pub ip_len: u16,
    /// L4 protocol.
    pub l4: L4Kind,
    /// L4 header length (0 when unknown).
    pub l4_len: u8,
}

impl HeaderLayout {
    /// Bytes of headers in front of the payload.
    pub fn total(&self) -> usize {
        self.mac_len as usize + self.ip_len as usize + self.l4_len as usize
    }
}

/// What the TX path writes for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadPlan {
    /// Context descriptor to place before the data descriptors.
    pub context: Option<ContextFields>,
    /// Command template for every data descriptor (EOP/RS filled in later).
    pub command: DataCommand,
}

/// Parse L2-L4 headers. `None` if not even an Ethernet header is present.
pub fn parse_headers(frame: &[u8]) -> Option<HeaderLayout> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    let mut ethertype: u16 = eth.ethertype().into();
    let mut mac_len = ETH_HLEN;
    if ethertype == ETHERTYPE_VLAN {
        let end = (ETH_HLEN + VLAN_HLEN) as usize;
        if frame.len() < end {
            return None;
        }
        ethertype = u16::from_be_bytes([frame[end - 2], frame[end - 1]]);
        mac_len += VLAN_HLEN;
    }

    let mut layout = HeaderLayout {
        mac_len,
        l3: L3Kind::Other,
        ip_len: 0,
        l4: L4Kind::None,
        l4_len: 0,
    };

    let l3 = &frame[mac_len as usize..];
    let next = match ethertype {
        ETHERTYPE_IPV4 if l3.len() >= IPV4_MIN_HLEN => {
            let ip = Ipv4Packet::new_unchecked(l3);
            layout.l3 = L3Kind::Ipv4;
            layout.ip_len = ip.header_len() as u16;
            ip.next_header()
        }
        ETHERTYPE_IPV6 if l3.len() >= IPV6_HLEN => {
            let ip = Ipv6Packet::new_unchecked(l3);
            layout.l3 = L3Kind::Ipv6;
            layout.ip_len = IPV6_HLEN as u16;
            ip.next_header()
        }
        _ => return Some(layout),
    };

    let l4 = l3.get(layout.ip_len as usize..).unwrap_or(&[]);
    match next {
        IpProtocol::Tcp => {
            layout.l4 = L4Kind::Tcp;
            if l4.len() >= TCP_MIN_HLEN {
                layout.l4_len = TcpPacket::new_unchecked(l4).header_len();
            }
        }
        IpProtocol::Udp => {
            layout.l4 = L4Kind::Udp;
            layout.l4_len = UDP_HLEN;
        }
        _ => {}
    }
    Some(layout)
}

/// Decide context and command bits for one packet.
///
/// `enabled` is the queue's offload set; anything the packet asks for
/// outside it is silently ignored. A TSO request that cannot be honoured
/// is fatal for the packet.
pub fn plan_offload(
    request: &TxOffloadRequest,
    enabled: OffloadFlags,
    needs_context: bool,
    packet_len: usize,
    headers: &[u8],
) -> Result<OffloadPlan, FatalReason> {
    let wanted = request.flags & enabled;
    let vlan = if enabled.contains(OffloadFlags::VLAN_INSERT) {
        request.vlan_tag
    } else {
        None
    };

    if wanted.contains(OffloadFlags::TSO) {
        return plan_tso(request.mss, vlan, packet_len, headers);
    }

    let mut command = DataCommand {
        vlan: vlan.is_some(),
        payload_len: packet_len as u32,
        ..DataCommand::default()
    };
    let csum = wanted & OffloadFlags::TX_CSUM;
    if vlan.is_none() && !needs_context && csum.is_empty() {
        return Ok(OffloadPlan {
            context: None,
            command,
        });
    }

    let mut ctx = ContextFields {
        vlan_tag: vlan.unwrap_or(0),
        mac_len: ETH_HLEN,
        ..ContextFields::default()
    };
    let Some(layout) = parse_headers(headers) else {
        return Ok(OffloadPlan {
            context: Some(ctx),
            command,
        });
    };
    ctx.mac_len = layout.mac_len;

    if !csum.is_empty() && layout.l3 != L3Kind::Other {
        ctx.ip_len = layout.ip_len;
        ctx.ipv4 = layout.l3 == L3Kind::Ipv4;
        command.ip_csum = ctx.ipv4 && csum.contains(OffloadFlags::IPV4_CSUM);
        match layout.l4 {
            L4Kind::Tcp if csum.contains(OffloadFlags::TCP_CSUM) => {
                ctx.l4 = L4Kind::Tcp;
                command.l4_csum = true;
            }
            L4Kind::Udp if csum.contains(OffloadFlags::UDP_CSUM) => {
                ctx.l4 = L4Kind::Udp;
                command.l4_csum = true;
            }
            _ => {}
        }
    }

    Ok(OffloadPlan {
        context: Some(ctx),
        command,
    })
}

fn plan_tso(
    mss: u16,
    vlan: Option<u16>,
    packet_len: usize,
    headers: &[u8],
) -> Result<OffloadPlan, FatalReason> {
    let layout = parse_headers(headers).ok_or(FatalReason::UnsupportedOffload)?;
    if layout.l3 == L3Kind::Other || layout.l4 != L4Kind::Tcp || layout.l4_len == 0 || mss == 0 {
        return Err(FatalReason::UnsupportedOffload);
    }
    let header_len = layout.total();
    if packet_len <= header_len {
        return Err(FatalReason::UnsupportedOffload);
    }

    let ipv4 = layout.l3 == L3Kind::Ipv4;
    Ok(OffloadPlan {
        context: Some(ContextFields {
            vlan_tag: vlan.unwrap_or(0),
            mac_len: layout.mac_len,
            ip_len: layout.ip_len,
            ipv4,
            l4: L4Kind::Tcp,
            l4_len: layout.l4_len,
            mss,
        }),
        command: DataCommand {
            vlan: vlan.is_some(),
            tso: true,
            ip_csum: ipv4,
            l4_csum: true,
            payload_len: (packet_len - header_len) as u32,
            ..DataCommand::default()
        },
    })
}
