//! Offload capability and request types.

use bitflags::bitflags;

bitflags! {
    /// Offloads a queue is configured for, or a packet asks for.
    #[derive(Default)]
    pub struct OffloadFlags: u32 {
        /// Insert the IPv4 header checksum on transmit.
        const IPV4_CSUM   = 1 << 0;
        /// Insert the TCP checksum on transmit.
        const TCP_CSUM    = 1 << 1;
        /// Insert the UDP checksum on transmit.
        const UDP_CSUM    = 1 << 2;
        /// TCP segmentation offload.
        const TSO         = 1 << 3;
        /// Insert an 802.1Q tag on transmit.
        const VLAN_INSERT = 1 << 4;
        /// Report hardware checksum results on receive.
        const RX_CSUM     = 1 << 5;
        /// Strip the 802.1Q tag on receive and report it as metadata.
        const VLAN_STRIP  = 1 << 6;

        /// Any transmit checksum insertion.
        const TX_CSUM = Self::IPV4_CSUM.bits | Self::TCP_CSUM.bits | Self::UDP_CSUM.bits;
    }
}

/// Per-packet transmit offload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOffloadRequest {
    /// Offloads asked for (masked by the queue's enabled set).
    pub flags: OffloadFlags,
    /// 802.1Q tag to insert.
    pub vlan_tag: Option<u16>,
    /// Segment size for TSO.
    pub mss: u16,
}

impl TxOffloadRequest {
    /// No offload at all.
    pub const fn none() -> Self {
        Self {
            flags: OffloadFlags::empty(),
            vlan_tag: None,
            mss: 0,
        }
    }

    /// Checksum insertion only.
    pub fn checksum(flags: OffloadFlags) -> Self {
        Self {
            flags: flags & OffloadFlags::TX_CSUM,
            ..Self::none()
        }
    }

    /// TCP segmentation with the given MSS.
    pub fn tso(mss: u16) -> Self {
        Self {
            flags: OffloadFlags::TSO | OffloadFlags::TCP_CSUM | OffloadFlags::IPV4_CSUM,
            vlan_tag: None,
            mss,
        }
    }

    /// Add a VLAN tag to insert.
    pub fn with_vlan(mut self, tag: u16) -> Self {
        self.flags |= OffloadFlags::VLAN_INSERT;
        self.vlan_tag = Some(tag);
        self
    }
}
