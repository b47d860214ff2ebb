//! Packet traits and the received-packet container.

use alloc::vec::Vec;

use super::offload::TxOffloadRequest;

/// An outbound packet as the engine sees it.
///
/// The engine never copies payload. It only needs the total length, the
/// leading header bytes for offload context setup, and an optional flow
/// hash for queue selection. Dropping the packet releases it to its origin.
pub trait TxPacket: Send {
    /// Total length in bytes.
    fn len(&self) -> usize;

    /// True if the packet carries no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contiguous leading bytes (at least the L2-L4 headers when any
    /// offload is requested).
    fn headers(&self) -> &[u8];

    /// Requested transmit offloads.
    fn offload(&self) -> TxOffloadRequest {
        TxOffloadRequest::none()
    }

    /// Flow hash for queue selection.
    fn flow_hash(&self) -> Option<u32> {
        None
    }
}

/// A receive buffer the device can DMA into.
pub trait RxBuffer: Send {
    /// Usable bytes.
    fn capacity(&self) -> usize;

    /// Buffer contents.
    fn bytes(&self) -> &[u8];

    /// Buffer contents, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Called right before the buffer is handed to the device.
    fn on_post(&mut self) {}

    /// Called once the device has written the buffer back.
    fn on_reclaim(&mut self) {}
}

/// Result of one hardware checksum check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumStatus {
    /// Hardware did not check (or RX checksum offload is off).
    #[default]
    NotChecked,
    /// Checked and correct.
    Good,
    /// Checked and wrong.
    Bad,
}

/// Hardware checksum results for a received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxChecksum {
    /// IPv4 header checksum.
    pub ip: ChecksumStatus,
    /// TCP/UDP checksum.
    pub l4: ChecksumStatus,
}

/// One buffer of a received packet.
#[derive(Debug)]
pub struct RxFragment<B> {
    /// The buffer.
    pub buffer: B,
    /// Bytes of packet data at the start of `buffer`.
    pub len: usize,
}

/// A fully received packet, possibly spanning several buffers.
#[derive(Debug)]
pub struct RxPacket<B> {
    /// Buffers in arrival order.
    pub fragments: Vec<RxFragment<B>>,
    /// Total length across fragments.
    pub len: usize,
    /// Stripped 802.1Q tag.
    pub vlan: Option<u16>,
    /// Hardware checksum results.
    pub checksum: RxChecksum,
    /// Device packet-type field.
    pub packet_type: u16,
    /// Payload was copied into a fresh small buffer.
    pub copied: bool,
}

impl<B: RxBuffer> RxPacket<B> {
    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length packet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the packet into `out`, returning the bytes written.
    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let mut written = 0;
        for frag in &self.fragments {
            let bytes = frag.buffer.bytes();
            let n = frag.len.min(bytes.len()).min(out.len() - written);
            out[written..written + n].copy_from_slice(&bytes[..n]);
            written += n;
            if written == out.len() {
                break;
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HeapBuffer(Vec<u8>);

    impl RxBuffer for HeapBuffer {
        fn capacity(&self) -> usize {
            self.0.len()
        }
        fn bytes(&self) -> &[u8] {
            &self.0
        }
        fn bytes_mut(&mut self) -> &mut [u8] {
            &mut self.0
        }
    }

    fn packet(frags: &[(&[u8], usize)]) -> RxPacket<HeapBuffer> {
        RxPacket {
            fragments: frags
                .iter()
                .map(|(data, len)| RxFragment {
                    buffer: HeapBuffer(data.to_vec()),
                    len: *len,
                })
                .collect(),
            len: frags.iter().map(|(_, len)| len).sum(),
            vlan: None,
            checksum: RxChecksum::default(),
            packet_type: 0,
            copied: false,
        }
    }

    #[test]
    fn test_copy_to_joins_fragments() {
        let p = packet(&[(&[1, 2, 3, 0][..], 3), (&[4, 5][..], 2)]);
        let mut out = [0u8; 8];
        assert_eq!(p.copy_to(&mut out), 5);
        assert_eq!(&out[..5], &[1, 2, 3, 4, 5]);

        let mut short = [0u8; 4];
        assert_eq!(p.copy_to(&mut short), 4);
        assert_eq!(short, [1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_to_clamps_overlong_fragment() {
        // Device reported more bytes than the buffer holds.
        let p = packet(&[(&[9, 9][..], 6), (&[7][..], 1)]);
        let mut out = [0u8; 16];
        assert_eq!(p.copy_to(&mut out), 3);
        assert_eq!(&out[..3], &[9, 9, 7]);
    }
}
