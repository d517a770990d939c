//! Typed header views over pktflow packet buffers.
//!
//! The graph runtime treats a packet as opaque bytes; this crate maps a
//! buffer to L2/L3/L4 header views for callbacks that parse or build
//! traffic. Parsing caches the L3/L4 offsets in the buffer's metadata so
//! later stages don't re-derive them; building goes through the
//! `init_empty_*` family, which lays out headers for a payload size and
//! leaves the field values to the caller.
//!
//! Header views are `smoltcp::wire` types borrowed from the buffer, so all
//! field access is bounds-checked slicing, no transmutes.
//!
//! # Example
//!
//! ```no_run
//! use pktflow::{Mbuf, UserContext};
//! use pktflow_packet::Packet;
//!
//! fn build(pkt: &mut Mbuf, _ctx: Option<&mut dyn UserContext>) {
//!     let mut packet = Packet::new(pkt);
//!     packet.init_empty_ipv4_udp(64);
//!     if let Some(mut udp) = packet.udp() {
//!         udp.set_src_port(1234);
//!         udp.set_dst_port(5678);
//!     }
//! }
//! ```

use pktflow::Mbuf;

use smoltcp::wire::{
    EthernetFrame, EthernetProtocol, Icmpv4Packet, IpAddress, IpProtocol, Ipv4Packet, Ipv6Packet,
    TcpPacket, UdpPacket,
};

pub const ETHER_HDR_LEN: usize = 14;
pub const IPV4_MIN_HDR_LEN: usize = 20;
pub const IPV6_HDR_LEN: usize = 40;
pub const UDP_HDR_LEN: usize = 8;
pub const TCP_MIN_HDR_LEN: usize = 20;
pub const ICMP_HDR_LEN: usize = 8;

/// A parsing/building view over one packet buffer.
pub struct Packet<'a> {
    mbuf: &'a mut Mbuf,
}

impl<'a> Packet<'a> {
    pub fn new(mbuf: &'a mut Mbuf) -> Packet<'a> {
        Packet { mbuf }
    }

    /// The underlying buffer.
    pub fn mbuf(&mut self) -> &mut Mbuf {
        self.mbuf
    }

    /// Ethernet header view. `None` when the buffer is shorter than one
    /// Ethernet header.
    pub fn ether(&mut self) -> Option<EthernetFrame<&mut [u8]>> {
        if self.mbuf.data_len() < ETHER_HDR_LEN {
            return None;
        }
        Some(EthernetFrame::new_unchecked(self.mbuf.data_mut()))
    }

    /// Locate the L3 header after the Ethernet header, caching its offset.
    /// Returns the ethertype.
    pub fn parse_l3(&mut self) -> Option<EthernetProtocol> {
        if self.mbuf.data_len() < ETHER_HDR_LEN {
            return None;
        }
        let ethertype = EthernetFrame::new_unchecked(self.mbuf.data()).ethertype();
        self.mbuf.set_l3_offset(ETHER_HDR_LEN);
        Some(ethertype)
    }

    /// IPv4 header view at the cached L3 offset.
    pub fn ipv4(&mut self) -> Option<Ipv4Packet<&mut [u8]>> {
        let offset = self.mbuf.l3_offset()?;
        let data = self.mbuf.data_mut();
        if data.len() < offset + IPV4_MIN_HDR_LEN {
            return None;
        }
        Some(Ipv4Packet::new_unchecked(&mut data[offset..]))
    }

    /// IPv6 header view at the cached L3 offset.
    pub fn ipv6(&mut self) -> Option<Ipv6Packet<&mut [u8]>> {
        let offset = self.mbuf.l3_offset()?;
        let data = self.mbuf.data_mut();
        if data.len() < offset + IPV6_HDR_LEN {
            return None;
        }
        Some(Ipv6Packet::new_unchecked(&mut data[offset..]))
    }

    /// Locate the L4 header of an IPv4 packet, honoring the header length
    /// field, and cache its offset. Returns the carried protocol.
    pub fn parse_l4_for_ipv4(&mut self) -> Option<IpProtocol> {
        let offset = self.mbuf.l3_offset()?;
        let data = self.mbuf.data();
        if data.len() < offset + IPV4_MIN_HDR_LEN {
            return None;
        }
        let ipv4 = Ipv4Packet::new_unchecked(&data[offset..]);
        let header_len = ipv4.header_len() as usize;
        let protocol = ipv4.next_header();
        if data.len() < offset + header_len {
            return None;
        }
        self.mbuf.set_l4_offset(offset + header_len);
        Some(protocol)
    }

    /// Locate the L4 header of an IPv6 packet (fixed 40-byte header, no
    /// extension-header walk) and cache its offset.
    pub fn parse_l4_for_ipv6(&mut self) -> Option<IpProtocol> {
        let offset = self.mbuf.l3_offset()?;
        let data = self.mbuf.data();
        if data.len() < offset + IPV6_HDR_LEN {
            return None;
        }
        let ipv6 = Ipv6Packet::new_unchecked(&data[offset..]);
        let protocol = ipv6.next_header();
        self.mbuf.set_l4_offset(offset + IPV6_HDR_LEN);
        Some(protocol)
    }

    /// UDP header view at the cached L4 offset.
    pub fn udp(&mut self) -> Option<UdpPacket<&mut [u8]>> {
        let offset = self.mbuf.l4_offset()?;
        let data = self.mbuf.data_mut();
        if data.len() < offset + UDP_HDR_LEN {
            return None;
        }
        Some(UdpPacket::new_unchecked(&mut data[offset..]))
    }

    /// TCP header view at the cached L4 offset.
    pub fn tcp(&mut self) -> Option<TcpPacket<&mut [u8]>> {
        let offset = self.mbuf.l4_offset()?;
        let data = self.mbuf.data_mut();
        if data.len() < offset + TCP_MIN_HDR_LEN {
            return None;
        }
        Some(TcpPacket::new_unchecked(&mut data[offset..]))
    }

    /// ICMPv4 header view at the cached L4 offset.
    pub fn icmpv4(&mut self) -> Option<Icmpv4Packet<&mut [u8]>> {
        let offset = self.mbuf.l4_offset()?;
        let data = self.mbuf.data_mut();
        if data.len() < offset + ICMP_HDR_LEN {
            return None;
        }
        Some(Icmpv4Packet::new_unchecked(&mut data[offset..]))
    }

    /// Bytes after the cached L4 header plus its fixed length, if any.
    pub fn l4_payload_offset(&self) -> Option<usize> {
        self.mbuf.l4_offset().map(|o| o + UDP_HDR_LEN)
    }

    // ==================== builders ====================

    /// Lay out a plain L2 packet around `payload_len` bytes of payload.
    pub fn init_empty(&mut self, payload_len: usize) -> bool {
        let Some(region) = reset_and_append(self.mbuf, ETHER_HDR_LEN + payload_len) else {
            return false;
        };
        region.fill(0);
        self.mbuf.set_l3_offset(ETHER_HDR_LEN);
        true
    }

    /// Lay out Ethernet + IPv4 around `payload_len` bytes of L3 payload.
    pub fn init_empty_ipv4(&mut self, payload_len: usize) -> bool {
        let l3_len = IPV4_MIN_HDR_LEN + payload_len;
        self.layout_ipv4(l3_len, IpProtocol::Unknown(0))
    }

    /// Lay out Ethernet + IPv4 + UDP around `payload_len` bytes of L4
    /// payload.
    pub fn init_empty_ipv4_udp(&mut self, payload_len: usize) -> bool {
        let l3_len = IPV4_MIN_HDR_LEN + UDP_HDR_LEN + payload_len;
        if !self.layout_ipv4(l3_len, IpProtocol::Udp) {
            return false;
        }
        let l4_offset = ETHER_HDR_LEN + IPV4_MIN_HDR_LEN;
        self.mbuf.set_l4_offset(l4_offset);
        let data = self.mbuf.data_mut();
        let mut udp = UdpPacket::new_unchecked(&mut data[l4_offset..]);
        udp.set_len((UDP_HDR_LEN + payload_len) as u16);
        true
    }

    /// Lay out Ethernet + IPv4 + TCP (no options) around `payload_len`
    /// bytes of L4 payload.
    pub fn init_empty_ipv4_tcp(&mut self, payload_len: usize) -> bool {
        let l3_len = IPV4_MIN_HDR_LEN + TCP_MIN_HDR_LEN + payload_len;
        if !self.layout_ipv4(l3_len, IpProtocol::Tcp) {
            return false;
        }
        let l4_offset = ETHER_HDR_LEN + IPV4_MIN_HDR_LEN;
        self.mbuf.set_l4_offset(l4_offset);
        let data = self.mbuf.data_mut();
        let mut tcp = TcpPacket::new_unchecked(&mut data[l4_offset..]);
        tcp.set_header_len(TCP_MIN_HDR_LEN as u8);
        true
    }

    /// Lay out Ethernet + IPv4 + ICMP around `payload_len` bytes of L4
    /// payload.
    pub fn init_empty_ipv4_icmp(&mut self, payload_len: usize) -> bool {
        let l3_len = IPV4_MIN_HDR_LEN + ICMP_HDR_LEN + payload_len;
        if !self.layout_ipv4(l3_len, IpProtocol::Icmp) {
            return false;
        }
        self.mbuf.set_l4_offset(ETHER_HDR_LEN + IPV4_MIN_HDR_LEN);
        true
    }

    /// Lay out Ethernet + IPv6 + UDP around `payload_len` bytes of L4
    /// payload.
    pub fn init_empty_ipv6_udp(&mut self, payload_len: usize) -> bool {
        let l4_len = UDP_HDR_LEN + payload_len;
        if !self.layout_ipv6(l4_len, IpProtocol::Udp) {
            return false;
        }
        let l4_offset = ETHER_HDR_LEN + IPV6_HDR_LEN;
        self.mbuf.set_l4_offset(l4_offset);
        let data = self.mbuf.data_mut();
        let mut udp = UdpPacket::new_unchecked(&mut data[l4_offset..]);
        udp.set_len(l4_len as u16);
        true
    }

    /// Lay out Ethernet + IPv6 + TCP (no options) around `payload_len`
    /// bytes of L4 payload.
    pub fn init_empty_ipv6_tcp(&mut self, payload_len: usize) -> bool {
        let l4_len = TCP_MIN_HDR_LEN + payload_len;
        if !self.layout_ipv6(l4_len, IpProtocol::Tcp) {
            return false;
        }
        let l4_offset = ETHER_HDR_LEN + IPV6_HDR_LEN;
        self.mbuf.set_l4_offset(l4_offset);
        let data = self.mbuf.data_mut();
        let mut tcp = TcpPacket::new_unchecked(&mut data[l4_offset..]);
        tcp.set_header_len(TCP_MIN_HDR_LEN as u8);
        true
    }

    fn layout_ipv4(&mut self, l3_len: usize, protocol: IpProtocol) -> bool {
        let Some(region) = reset_and_append(self.mbuf, ETHER_HDR_LEN + l3_len) else {
            return false;
        };
        region.fill(0);
        let mut ether = EthernetFrame::new_unchecked(&mut region[..]);
        ether.set_ethertype(EthernetProtocol::Ipv4);
        let mut ipv4 = Ipv4Packet::new_unchecked(&mut region[ETHER_HDR_LEN..]);
        ipv4.set_version(4);
        ipv4.set_header_len(IPV4_MIN_HDR_LEN as u8);
        ipv4.set_total_len(l3_len as u16);
        ipv4.set_next_header(protocol);
        ipv4.set_hop_limit(64);
        self.mbuf.set_l3_offset(ETHER_HDR_LEN);
        true
    }

    fn layout_ipv6(&mut self, l4_len: usize, protocol: IpProtocol) -> bool {
        let Some(region) = reset_and_append(self.mbuf, ETHER_HDR_LEN + IPV6_HDR_LEN + l4_len)
        else {
            return false;
        };
        region.fill(0);
        let mut ether = EthernetFrame::new_unchecked(&mut region[..]);
        ether.set_ethertype(EthernetProtocol::Ipv6);
        let mut ipv6 = Ipv6Packet::new_unchecked(&mut region[ETHER_HDR_LEN..]);
        ipv6.set_version(6);
        ipv6.set_payload_len(l4_len as u16);
        ipv6.set_next_header(protocol);
        ipv6.set_hop_limit(64);
        self.mbuf.set_l3_offset(ETHER_HDR_LEN);
        true
    }

    // ==================== checksums ====================

    /// Fill the IPv4 and UDP checksums for transmission.
    ///
    /// With `hw_offload` the NIC finishes the job: the IPv4 checksum is left
    /// zero and the UDP field carries only the non-inverted pseudo-header
    /// sum, as hardware offload expects. Returns `false` when the packet
    /// isn't parsed as IPv4 + UDP.
    pub fn fill_ipv4_udp_checksums(&mut self, hw_offload: bool) -> bool {
        let (Some(l3), Some(l4)) = (self.mbuf.l3_offset(), self.mbuf.l4_offset()) else {
            return false;
        };
        let data = self.mbuf.data_mut();
        if data.len() < l4 + UDP_HDR_LEN {
            return false;
        }
        let (src, dst, l4_len) = {
            let ipv4 = Ipv4Packet::new_unchecked(&data[l3..]);
            let l4_len = (ipv4.total_len() as usize).saturating_sub(ipv4.header_len() as usize);
            (ipv4.src_addr(), ipv4.dst_addr(), l4_len)
        };
        if hw_offload {
            Ipv4Packet::new_unchecked(&mut data[l3..]).set_checksum(0);
            let pseudo = pseudo_header_checksum_ipv4(
                &src.octets(),
                &dst.octets(),
                IpProtocol::Udp,
                l4_len,
            );
            UdpPacket::new_unchecked(&mut data[l4..]).set_checksum(pseudo);
        } else {
            Ipv4Packet::new_unchecked(&mut data[l3..]).fill_checksum();
            let mut udp = UdpPacket::new_unchecked(&mut data[l4..]);
            udp.fill_checksum(&IpAddress::Ipv4(src), &IpAddress::Ipv4(dst));
        }
        true
    }

    /// Fill the IPv4 and TCP checksums for transmission; see
    /// [`fill_ipv4_udp_checksums`](Packet::fill_ipv4_udp_checksums) for the
    /// `hw_offload` split.
    pub fn fill_ipv4_tcp_checksums(&mut self, hw_offload: bool) -> bool {
        let (Some(l3), Some(l4)) = (self.mbuf.l3_offset(), self.mbuf.l4_offset()) else {
            return false;
        };
        let data = self.mbuf.data_mut();
        if data.len() < l4 + TCP_MIN_HDR_LEN {
            return false;
        }
        let (src, dst, l4_len) = {
            let ipv4 = Ipv4Packet::new_unchecked(&data[l3..]);
            let l4_len = (ipv4.total_len() as usize).saturating_sub(ipv4.header_len() as usize);
            (ipv4.src_addr(), ipv4.dst_addr(), l4_len)
        };
        if hw_offload {
            Ipv4Packet::new_unchecked(&mut data[l3..]).set_checksum(0);
            let pseudo = pseudo_header_checksum_ipv4(
                &src.octets(),
                &dst.octets(),
                IpProtocol::Tcp,
                l4_len,
            );
            TcpPacket::new_unchecked(&mut data[l4..]).set_checksum(pseudo);
        } else {
            Ipv4Packet::new_unchecked(&mut data[l3..]).fill_checksum();
            let mut tcp = TcpPacket::new_unchecked(&mut data[l4..]);
            tcp.fill_checksum(&IpAddress::Ipv4(src), &IpAddress::Ipv4(dst));
        }
        true
    }

    /// Fill the ICMPv4 checksum (no pseudo header, so no offload split).
    pub fn fill_icmpv4_checksum(&mut self) -> bool {
        match self.icmpv4() {
            Some(mut icmp) => {
                icmp.fill_checksum();
                true
            }
            None => false,
        }
    }

    /// Verify the IPv4 header checksum and the UDP checksum.
    pub fn verify_ipv4_udp_checksums(&mut self) -> bool {
        let (Some(l3), Some(l4)) = (self.mbuf.l3_offset(), self.mbuf.l4_offset()) else {
            return false;
        };
        let data = self.mbuf.data();
        if data.len() < l4 + UDP_HDR_LEN {
            return false;
        }
        let ipv4 = Ipv4Packet::new_unchecked(&data[l3..]);
        if !ipv4.verify_checksum() {
            return false;
        }
        let (src, dst) = (ipv4.src_addr(), ipv4.dst_addr());
        let udp = UdpPacket::new_unchecked(&data[l4..]);
        udp.verify_checksum(&IpAddress::Ipv4(src), &IpAddress::Ipv4(dst))
    }

    // ==================== byte-level reshaping ====================

    /// Insert `len` bytes of room at byte position `start`, shifting the
    /// rest of the packet towards the tail. Invalidates the cached header
    /// offsets.
    pub fn encapsulate_head(&mut self, start: usize, len: usize) -> bool {
        let old_len = self.mbuf.data_len();
        if start > old_len || self.mbuf.append(len).is_none() {
            return false;
        }
        self.mbuf.data_mut().copy_within(start..old_len, start + len);
        self.mbuf.reset_headers();
        true
    }

    /// Remove `len` bytes at byte position `start`, shifting the rest of
    /// the packet towards the head. Invalidates the cached header offsets.
    pub fn decapsulate_head(&mut self, start: usize, len: usize) -> bool {
        let old_len = self.mbuf.data_len();
        if start + len > old_len {
            return false;
        }
        self.mbuf.data_mut().copy_within(start + len..old_len, start);
        self.mbuf.trim(len);
        self.mbuf.reset_headers();
        true
    }
}

fn reset_and_append(mbuf: &mut Mbuf, len: usize) -> Option<&mut [u8]> {
    mbuf.reset();
    mbuf.append(len)
}

/// Non-inverted IPv4 pseudo-header sum, the value hardware checksum offload
/// expects preloaded into the L4 checksum field.
fn pseudo_header_checksum_ipv4(src: &[u8; 4], dst: &[u8; 4], protocol: IpProtocol, l4_len: usize) -> u16 {
    let mut sum: u32 = 0;
    sum += u16::from_be_bytes([src[0], src[1]]) as u32;
    sum += u16::from_be_bytes([src[2], src[3]]) as u32;
    sum += u16::from_be_bytes([dst[0], dst[1]]) as u32;
    sum += u16::from_be_bytes([dst[2], dst[3]]) as u32;
    sum += u8::from(protocol) as u32;
    sum += l4_len as u32;
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use pktflow::{Burst, MbufPtr, Mempool};
    use smoltcp::wire::Ipv4Address;

    fn with_mbuf(f: impl FnOnce(&mut Mbuf)) {
        let pool = Mempool::create("packet-test", 4);
        let mut bufs = Burst::new();
        pool.allocate_bulk(&mut bufs, 1).unwrap();
        let handle: MbufPtr = bufs[0];
        f(unsafe { handle.as_mut() });
        pool.free_bulk(&bufs);
    }

    #[test]
    fn test_init_and_parse_ipv4_udp() {
        with_mbuf(|mbuf| {
            {
                let mut packet = Packet::new(mbuf);
                assert!(packet.init_empty_ipv4_udp(16));
                let mut udp = packet.udp().unwrap();
                udp.set_src_port(53);
                udp.set_dst_port(9999);
            }
            assert_eq!(mbuf.data_len(), ETHER_HDR_LEN + IPV4_MIN_HDR_LEN + UDP_HDR_LEN + 16);

            // A consumer re-parses from scratch.
            mbuf.reset_headers();
            let mut packet = Packet::new(mbuf);
            assert_eq!(packet.parse_l3(), Some(EthernetProtocol::Ipv4));
            assert_eq!(packet.parse_l4_for_ipv4(), Some(IpProtocol::Udp));
            let udp = packet.udp().unwrap();
            assert_eq!(udp.src_port(), 53);
            assert_eq!(udp.dst_port(), 9999);
            assert_eq!(udp.len() as usize, UDP_HDR_LEN + 16);
        });
    }

    #[test]
    fn test_software_checksums_verify() {
        with_mbuf(|mbuf| {
            let mut packet = Packet::new(mbuf);
            assert!(packet.init_empty_ipv4_udp(8));
            {
                let mut ipv4 = packet.ipv4().unwrap();
                ipv4.set_src_addr(Ipv4Address::new(10, 0, 0, 1));
                ipv4.set_dst_addr(Ipv4Address::new(10, 0, 0, 2));
            }
            {
                let mut udp = packet.udp().unwrap();
                udp.set_src_port(7);
                udp.set_dst_port(7);
                udp.payload_mut()[..8].copy_from_slice(b"8 bytes!");
            }
            assert!(packet.fill_ipv4_udp_checksums(false));
            assert!(packet.verify_ipv4_udp_checksums());

            // Flip a payload byte; the UDP checksum must now fail.
            packet.udp().unwrap().payload_mut()[0] ^= 0xFF;
            assert!(!packet.verify_ipv4_udp_checksums());
        });
    }

    #[test]
    fn test_hw_offload_leaves_pseudo_header_sum() {
        with_mbuf(|mbuf| {
            let mut packet = Packet::new(mbuf);
            assert!(packet.init_empty_ipv4_udp(4));
            {
                let mut ipv4 = packet.ipv4().unwrap();
                ipv4.set_src_addr(Ipv4Address::new(192, 168, 0, 1));
                ipv4.set_dst_addr(Ipv4Address::new(192, 168, 0, 2));
            }
            assert!(packet.fill_ipv4_udp_checksums(true));
            let expected = pseudo_header_checksum_ipv4(
                &[192, 168, 0, 1],
                &[192, 168, 0, 2],
                IpProtocol::Udp,
                UDP_HDR_LEN + 4,
            );
            assert_eq!(packet.ipv4().unwrap().checksum(), 0);
            assert_eq!(packet.udp().unwrap().checksum(), expected);
        });
    }

    #[test]
    fn test_ipv6_udp_layout() {
        with_mbuf(|mbuf| {
            let mut packet = Packet::new(mbuf);
            assert!(packet.init_empty_ipv6_udp(10));
            assert_eq!(packet.parse_l3(), Some(EthernetProtocol::Ipv6));
            assert_eq!(packet.parse_l4_for_ipv6(), Some(IpProtocol::Udp));
            let ipv6 = packet.ipv6().unwrap();
            assert_eq!(ipv6.payload_len() as usize, UDP_HDR_LEN + 10);
        });
    }

    #[test]
    fn test_encapsulate_then_decapsulate_restores_bytes() {
        with_mbuf(|mbuf| {
            mbuf.copy_from_slice(&[1, 2, 3, 4, 5, 6]);
            let mut packet = Packet::new(mbuf);
            assert!(packet.encapsulate_head(2, 3));
            {
                let data = packet.mbuf().data_mut();
                assert_eq!(data.len(), 9);
                assert_eq!(&data[0..2], &[1, 2]);
                assert_eq!(&data[5..9], &[3, 4, 5, 6]);
                data[2..5].copy_from_slice(&[9, 9, 9]);
            }
            assert!(packet.decapsulate_head(2, 3));
            assert_eq!(packet.mbuf().data(), &[1, 2, 3, 4, 5, 6]);
        });
    }

    #[test]
    fn test_parse_rejects_short_buffers() {
        with_mbuf(|mbuf| {
            mbuf.copy_from_slice(&[0; 6]);
            let mut packet = Packet::new(mbuf);
            assert_eq!(packet.parse_l3(), None);
            assert!(packet.ipv4().is_none());
        });
    }
}
