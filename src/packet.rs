use byteorder::{BigEndian, ByteOrder};

use crate::message::FlowKey;

/// Convert six MAC address bytes into the `u64` form used throughout the
/// message model.
pub fn mac_of_bytes(bytes: [u8; 6]) -> u64 {
    let mut buf = [0u8; 8];
    buf[2..8].copy_from_slice(&bytes);
    BigEndian::read_u64(&buf)
}

/// Convert a `u64` MAC back into its six on-wire bytes.
pub fn bytes_of_mac(mac: u64) -> [u8; 6] {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, mac);
    let mut out = [0u8; 6];
    out.copy_from_slice(&buf[2..8]);
    out
}

const ETH_TYPE_VLAN: u16 = 0x8100;
const ETH_TYPE_IP: u16 = 0x0800;
const ETH_TYPE_ARP: u16 = 0x0806;

const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;
const IP_PROTO_ICMP: u8 = 1;

impl FlowKey {
    /// Extract a concrete flow key from an Ethernet frame received on
    /// `in_port`. Parses the L2 header, an optional 802.1Q tag, and the
    /// IPv4/ARP/transport fields the classifier matches on. Truncated or
    /// unrecognized payloads leave the corresponding fields zero.
    pub fn extract(frame: &[u8], in_port: u16) -> FlowKey {
        let mut key = FlowKey::default();
        key.in_port = in_port;
        if frame.len() < 14 {
            return key;
        }
        key.dl_dst = mac_of_bytes([frame[0], frame[1], frame[2], frame[3], frame[4], frame[5]]);
        key.dl_src = mac_of_bytes([frame[6], frame[7], frame[8], frame[9], frame[10], frame[11]]);
        let mut eth_type = BigEndian::read_u16(&frame[12..14]);
        let mut off = 14;
        if eth_type == ETH_TYPE_VLAN && frame.len() >= 18 {
            let tci = BigEndian::read_u16(&frame[14..16]);
            key.dl_vlan = Some(tci & 0x0fff);
            key.dl_vlan_pcp = (tci >> 13) as u8;
            eth_type = BigEndian::read_u16(&frame[16..18]);
            off = 18;
        }
        key.dl_typ = eth_type;
        match eth_type {
            ETH_TYPE_IP => Self::extract_ipv4(&frame[off..], &mut key),
            ETH_TYPE_ARP => Self::extract_arp(&frame[off..], &mut key),
            _ => {}
        }
        key
    }

    fn extract_ipv4(packet: &[u8], key: &mut FlowKey) {
        if packet.len() < 20 {
            return;
        }
        let ihl = (packet[0] & 0x0f) as usize * 4;
        if ihl < 20 || packet.len() < ihl {
            return;
        }
        key.nw_tos = packet[1] & 0xfc;
        key.nw_proto = packet[9];
        key.nw_src = BigEndian::read_u32(&packet[12..16]);
        key.nw_dst = BigEndian::read_u32(&packet[16..20]);
        let frag = BigEndian::read_u16(&packet[6..8]);
        // Later fragments carry no transport header.
        if frag & 0x1fff != 0 {
            return;
        }
        let l4 = &packet[ihl..];
        match key.nw_proto {
            IP_PROTO_TCP | IP_PROTO_UDP if l4.len() >= 4 => {
                key.tp_src = BigEndian::read_u16(&l4[0..2]);
                key.tp_dst = BigEndian::read_u16(&l4[2..4]);
            }
            IP_PROTO_ICMP if l4.len() >= 2 => {
                key.tp_src = l4[0] as u16;
                key.tp_dst = l4[1] as u16;
            }
            _ => {}
        }
    }

    fn extract_arp(packet: &[u8], key: &mut FlowKey) {
        if packet.len() < 28 {
            return;
        }
        let opcode = BigEndian::read_u16(&packet[6..8]);
        if opcode <= 0xff {
            key.nw_proto = opcode as u8;
        }
        key.nw_src = BigEndian::read_u32(&packet[14..18]);
        key.nw_dst = BigEndian::read_u32(&packet[24..28]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_conversions_roundtrip() {
        let mac = 0xAABBCCDDEEFF;
        assert_eq!(mac_of_bytes(bytes_of_mac(mac)), mac);
        assert_eq!(bytes_of_mac(mac), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[test]
    fn extract_tcp_flow() {
        let mut frame = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // dst
            0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, // src
            0x08, 0x00, // IPv4
        ];
        let ip = [
            0x45, 0x10, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x40, 0x06, 0x00, 0x00, 10, 0, 0, 1,
            10, 0, 0, 2,
        ];
        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&[0x1f, 0x90, 0x00, 0x50]); // ports 8080 -> 80
        let key = FlowKey::extract(&frame, 3);
        assert_eq!(key.in_port, 3);
        assert_eq!(key.dl_typ, 0x0800);
        assert_eq!(key.nw_proto, 6);
        assert_eq!(key.nw_src, 0x0a000001);
        assert_eq!(key.nw_dst, 0x0a000002);
        assert_eq!(key.tp_src, 8080);
        assert_eq!(key.tp_dst, 80);
        assert_eq!(key.dl_vlan, None);
    }

    #[test]
    fn extract_short_frame_is_harmless() {
        let key = FlowKey::extract(&[1, 2, 3], 1);
        assert_eq!(key.in_port, 1);
        assert_eq!(key.dl_typ, 0);
    }
}
