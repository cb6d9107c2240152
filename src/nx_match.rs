//! TLV-encoded wildcarded matches: the Nicira NXM form and the OpenFlow 1.2
//! OXM form.
//!
//! Each entry is a 32-bit header (class, field, has-mask, payload length)
//! followed by the value and, when has-mask is set, a mask of the same
//! width. Entries must appear with their prerequisites already satisfied,
//! so encoding emits fields in dependency order.

use std::convert::TryInto;

use byteorder::{BigEndian, ByteOrder};

use crate::bits::low_bits;
use crate::message::{Mask, Pattern};
use crate::ofp_message::{MatchEntryError, OfpSerializationError};
use crate::packet::{bytes_of_mac, mac_of_bytes};

const NXM_CLASS_OF: u16 = 0x0000;
const NXM_CLASS_NX: u16 = 0x0001;
const OXM_CLASS_BASIC: u16 = 0x8000;

const fn nxm_header(class: u16, field: u8, hasmask: bool, length: u8) -> u32 {
    ((class as u32) << 16) | ((field as u32) << 9) | ((hasmask as u32) << 8) | (length as u32)
}

fn header_class(header: u32) -> u16 {
    (header >> 16) as u16
}

fn header_field(header: u32) -> u8 {
    ((header >> 9) & 0x7f) as u8
}

fn header_hasmask(header: u32) -> bool {
    header & 0x100 != 0
}

fn header_length(header: u32) -> usize {
    (header & 0xff) as usize
}

// NXM_OF field numbers.
const F_IN_PORT: u8 = 0;
const F_ETH_DST: u8 = 1;
const F_ETH_SRC: u8 = 2;
const F_ETH_TYPE: u8 = 3;
const F_VLAN_TCI: u8 = 4;
const F_IP_TOS: u8 = 5;
const F_IP_PROTO: u8 = 6;
const F_IP_SRC: u8 = 7;
const F_IP_DST: u8 = 8;
const F_TCP_SRC: u8 = 9;
const F_TCP_DST: u8 = 10;
const F_UDP_SRC: u8 = 11;
const F_UDP_DST: u8 = 12;
const F_ICMP_TYPE: u8 = 13;
const F_ICMP_CODE: u8 = 14;
const F_ARP_OP: u8 = 15;
const F_ARP_SPA: u8 = 16;
const F_ARP_TPA: u8 = 17;

// NXM_NX field numbers.
const F_REG0: u8 = 0;
const F_TUN_ID: u8 = 16;
const F_ARP_SHA: u8 = 17;
const F_ARP_THA: u8 = 18;
const F_IPV6_SRC: u8 = 19;
const F_IPV6_DST: u8 = 20;
const F_ND_TARGET: u8 = 23;
const F_IP_FRAG: u8 = 26;
const F_COOKIE: u8 = 30;
const F_MPLS_LABEL: u8 = 31;
const F_MPLS_TC: u8 = 32;

// OXM basic-class field numbers (OpenFlow 1.2).
const OXM_IN_PORT: u8 = 0;
const OXM_ETH_DST: u8 = 3;
const OXM_ETH_SRC: u8 = 4;
const OXM_ETH_TYPE: u8 = 5;
const OXM_VLAN_VID: u8 = 6;
const OXM_VLAN_PCP: u8 = 7;
const OXM_IP_DSCP: u8 = 8;
const OXM_IP_PROTO: u8 = 10;
const OXM_IPV4_SRC: u8 = 11;
const OXM_IPV4_DST: u8 = 12;
const OXM_TCP_SRC: u8 = 13;
const OXM_TCP_DST: u8 = 14;
const OXM_UDP_SRC: u8 = 15;
const OXM_UDP_DST: u8 = 16;
const OXM_ICMP_TYPE: u8 = 19;
const OXM_ICMP_CODE: u8 = 20;
const OXM_ARP_OP: u8 = 21;
const OXM_ARP_SPA: u8 = 22;
const OXM_ARP_TPA: u8 = 23;
const OXM_ARP_SHA: u8 = 24;
const OXM_ARP_THA: u8 = 25;
const OXM_IPV6_SRC: u8 = 26;
const OXM_IPV6_DST: u8 = 27;
const OXM_ND_TARGET: u8 = 31;
const OXM_MPLS_LABEL: u8 = 34;
const OXM_MPLS_TC: u8 = 35;

const VLAN_CFI: u16 = 0x1000;

const ETH_TYPE_IP: u16 = 0x0800;
const ETH_TYPE_ARP: u16 = 0x0806;
const ETH_TYPE_IPV6: u16 = 0x86dd;
const ETH_TYPE_MPLS: u16 = 0x8847;
const ETH_TYPE_MPLS_MCAST: u16 = 0x8848;

/// Which TLV dialect is on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchEncoding {
    Nxm,
    Oxm,
}

/// Unknown-field policy, per the flow-format negotiation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParseMode {
    /// Reject entries whose field is unknown.
    Strict,
    /// Skip entries whose field is unknown.
    Loose,
}

/// A decoded TLV match: the pattern plus any cookie entry that rode along.
#[derive(Debug, PartialEq, Clone)]
pub struct NxMatch {
    pub pattern: Pattern,
    pub cookie: u64,
    pub cookie_mask: u64,
}

/// The number of buffer bytes occupied by a match of `match_len` bytes once
/// padded to 8-byte alignment.
pub fn padded_match_len(match_len: usize) -> usize {
    (match_len + 7) / 8 * 8
}

fn bad_entry(header: u32, kind: MatchEntryError) -> OfpSerializationError {
    OfpSerializationError::BadMatchEntry { header, kind }
}

/// Validate the entry at the head of `buf`, returning its header.
///
/// Returns `Ok(None)` when `match_len` is exhausted, an error when a partial
/// header, zero-length payload, or overrun is found.
fn entry_ok(buf: &[u8], match_len: usize) -> Result<Option<u32>, OfpSerializationError> {
    if match_len == 0 {
        return Ok(None);
    }
    if match_len < 4 || buf.len() < 4 {
        return Err(OfpSerializationError::BadLength {
            message: "nx_match ends with partial header".to_string(),
        });
    }
    let header = BigEndian::read_u32(&buf[..4]);
    let payload_len = header_length(header);
    if payload_len == 0 {
        return Err(bad_entry(header, MatchEntryError::BadLength));
    }
    if match_len < payload_len + 4 || buf.len() < payload_len + 4 {
        return Err(bad_entry(header, MatchEntryError::BadLength));
    }
    Ok(Some(header))
}

fn read_be(payload: &[u8]) -> u64 {
    let mut v: u64 = 0;
    for b in payload {
        v = (v << 8) | *b as u64;
    }
    v
}

fn read_be128(payload: &[u8]) -> u128 {
    let mut v: u128 = 0;
    for b in payload {
        v = (v << 8) | *b as u128;
    }
    v
}

/// Convert a full IPv4/IPv6-style bitmask into the internal
/// wildcarded-low-bit count. Non-prefix masks are invalid for these fields.
fn cidr_wild_bits(mask: u128, width_bits: u32) -> Option<u32> {
    let wild = mask.trailing_zeros().min(width_bits);
    let expect = if wild >= 128 { 0 } else { !0u128 << wild };
    let expect = expect & if width_bits >= 128 { !0 } else { (1u128 << width_bits) - 1 };
    if mask == expect {
        Some(wild)
    } else {
        None
    }
}

struct FieldPayload {
    value: u64,
    mask: Option<u64>,
    value128: u128,
    mask128: Option<u128>,
}

/// Parse a TLV match of `match_len` bytes out of `buf`. Alignment padding
/// after the entries is the caller's concern. `with_cookie` permits the
/// Nicira cookie entry (flow-mod context); elsewhere it is an unknown field.
pub fn parse(
    buf: &[u8],
    match_len: usize,
    mode: ParseMode,
    with_cookie: bool,
) -> Result<NxMatch, OfpSerializationError> {
    if buf.len() < match_len {
        return Err(OfpSerializationError::BadLength {
            message: "nx_match longer than space in message".to_string(),
        });
    }
    let mut pattern = Pattern::match_all();
    let mut cookie: u64 = 0;
    let mut cookie_mask: u64 = 0;
    let mut vlan_pcp_seen = false;

    let mut p = buf;
    let mut left = match_len;
    while let Some(header) = entry_ok(p, left)? {
        let payload_len = header_length(header);
        let width = if header_hasmask(header) {
            if payload_len % 2 != 0 {
                return Err(bad_entry(header, MatchEntryError::BadLength));
            }
            payload_len / 2
        } else {
            payload_len
        };
        let payload = FieldPayload {
            value: if width <= 8 { read_be(&p[4..4 + width]) } else { 0 },
            mask: if header_hasmask(header) && width <= 8 {
                Some(read_be(&p[4 + width..4 + 2 * width]))
            } else {
                None
            },
            value128: read_be128(&p[4..4 + width.min(16)]),
            mask128: if header_hasmask(header) {
                Some(read_be128(&p[4 + width..4 + width + width.min(16)]))
            } else {
                None
            },
        };
        match apply_entry(
            &mut pattern,
            &mut cookie,
            &mut cookie_mask,
            &mut vlan_pcp_seen,
            header,
            width,
            &payload,
            with_cookie,
        ) {
            Ok(()) => {}
            Err(e) => {
                if matches!(
                    e,
                    OfpSerializationError::BadMatchEntry {
                        kind: MatchEntryError::BadField,
                        ..
                    }
                ) && mode == ParseMode::Loose
                {
                    log::debug!("skipping unknown nx_match entry 0x{:08x}", header);
                } else {
                    return Err(e);
                }
            }
        }
        p = &p[4 + payload_len..];
        left -= 4 + payload_len;
    }
    Ok(NxMatch {
        pattern,
        cookie,
        cookie_mask,
    })
}

fn prereq_ip(pattern: &Pattern) -> bool {
    matches!(pattern.dl_typ, Some(ETH_TYPE_IP) | Some(ETH_TYPE_IPV6))
}

fn prereq_proto(pattern: &Pattern, proto: u8) -> bool {
    prereq_ip(pattern) && pattern.nw_proto == Some(proto)
}

#[allow(clippy::too_many_arguments)]
fn apply_entry(
    pattern: &mut Pattern,
    cookie: &mut u64,
    cookie_mask: &mut u64,
    vlan_pcp_seen: &mut bool,
    header: u32,
    width: usize,
    payload: &FieldPayload,
    with_cookie: bool,
) -> Result<(), OfpSerializationError> {
    let class = header_class(header);
    let field = header_field(header);
    let hasmask = header_hasmask(header);
    let dup = |taken: bool| -> Result<(), OfpSerializationError> {
        if taken {
            Err(bad_entry(header, MatchEntryError::DupField))
        } else {
            Ok(())
        }
    };
    let no_mask = |hasmask: bool| -> Result<(), OfpSerializationError> {
        if hasmask {
            Err(bad_entry(header, MatchEntryError::BadMask))
        } else {
            Ok(())
        }
    };
    let expect_width = |want: usize| -> Result<(), OfpSerializationError> {
        if width != want {
            Err(bad_entry(header, MatchEntryError::BadLength))
        } else {
            Ok(())
        }
    };

    // Map an OXM basic-class field onto its NXM_OF equivalent; the handling
    // below is shared. OXM IN_PORT keeps its 32-bit width special case.
    let (class, field, oxm_in_port) = if class == OXM_CLASS_BASIC {
        match field {
            OXM_IN_PORT => (NXM_CLASS_OF, F_IN_PORT, true),
            OXM_ETH_DST => (NXM_CLASS_OF, F_ETH_DST, false),
            OXM_ETH_SRC => (NXM_CLASS_OF, F_ETH_SRC, false),
            OXM_ETH_TYPE => (NXM_CLASS_OF, F_ETH_TYPE, false),
            OXM_VLAN_VID => {
                // OXM carries only the 12-bit vid plus the PRESENT bit; the
                // priority travels in its own entry.
                expect_width(2)?;
                no_mask(hasmask)?;
                dup(pattern.dl_vlan.is_some())?;
                let value = payload.value as u16;
                if value == 0 {
                    pattern.dl_vlan = Some(None);
                } else if value & VLAN_CFI != 0 {
                    pattern.dl_vlan = Some(Some(value & 0x0fff));
                } else {
                    return Err(bad_entry(header, MatchEntryError::BadValue));
                }
                return Ok(());
            }
            OXM_VLAN_PCP => {
                expect_width(1)?;
                no_mask(hasmask)?;
                dup(*vlan_pcp_seen)?;
                *vlan_pcp_seen = true;
                pattern.dl_vlan_pcp = Some(payload.value as u8);
                return Ok(());
            }
            OXM_IP_DSCP => {
                // OXM uses the 6-bit DSCP; internally the full TOS byte.
                expect_width(1)?;
                no_mask(hasmask)?;
                if !prereq_ip(pattern) {
                    return Err(bad_entry(header, MatchEntryError::BadPrereq));
                }
                dup(pattern.nw_tos.is_some())?;
                if payload.value > 0x3f {
                    return Err(bad_entry(header, MatchEntryError::BadValue));
                }
                pattern.nw_tos = Some((payload.value as u8) << 2);
                return Ok(());
            }
            OXM_IP_PROTO => (NXM_CLASS_OF, F_IP_PROTO, false),
            OXM_IPV4_SRC => (NXM_CLASS_OF, F_IP_SRC, false),
            OXM_IPV4_DST => (NXM_CLASS_OF, F_IP_DST, false),
            OXM_TCP_SRC => (NXM_CLASS_OF, F_TCP_SRC, false),
            OXM_TCP_DST => (NXM_CLASS_OF, F_TCP_DST, false),
            OXM_UDP_SRC => (NXM_CLASS_OF, F_UDP_SRC, false),
            OXM_UDP_DST => (NXM_CLASS_OF, F_UDP_DST, false),
            OXM_ICMP_TYPE => (NXM_CLASS_OF, F_ICMP_TYPE, false),
            OXM_ICMP_CODE => (NXM_CLASS_OF, F_ICMP_CODE, false),
            OXM_ARP_OP => (NXM_CLASS_OF, F_ARP_OP, false),
            OXM_ARP_SPA => (NXM_CLASS_OF, F_ARP_SPA, false),
            OXM_ARP_TPA => (NXM_CLASS_OF, F_ARP_TPA, false),
            OXM_ARP_SHA => (NXM_CLASS_NX, F_ARP_SHA, false),
            OXM_ARP_THA => (NXM_CLASS_NX, F_ARP_THA, false),
            OXM_IPV6_SRC => (NXM_CLASS_NX, F_IPV6_SRC, false),
            OXM_IPV6_DST => (NXM_CLASS_NX, F_IPV6_DST, false),
            OXM_ND_TARGET => (NXM_CLASS_NX, F_ND_TARGET, false),
            OXM_MPLS_LABEL => (NXM_CLASS_NX, F_MPLS_LABEL, false),
            OXM_MPLS_TC => (NXM_CLASS_NX, F_MPLS_TC, false),
            _ => return Err(bad_entry(header, MatchEntryError::BadField)),
        }
    } else {
        (class, field, false)
    };

    match (class, field) {
        (NXM_CLASS_OF, F_IN_PORT) => {
            no_mask(hasmask)?;
            dup(pattern.in_port.is_some())?;
            let port = if oxm_in_port {
                expect_width(4)?;
                // 32 bits on the wire, 16 internally.
                if payload.value > 0xffff {
                    return Err(bad_entry(header, MatchEntryError::BadValue));
                }
                payload.value as u16
            } else {
                expect_width(2)?;
                payload.value as u16
            };
            pattern.in_port = Some(port);
        }
        (NXM_CLASS_OF, F_ETH_DST) => {
            expect_width(6)?;
            no_mask(hasmask)?;
            dup(pattern.dl_dst.is_some())?;
            pattern.dl_dst = Some(payload.value);
        }
        (NXM_CLASS_OF, F_ETH_SRC) => {
            expect_width(6)?;
            no_mask(hasmask)?;
            dup(pattern.dl_src.is_some())?;
            pattern.dl_src = Some(payload.value);
        }
        (NXM_CLASS_OF, F_ETH_TYPE) => {
            expect_width(2)?;
            no_mask(hasmask)?;
            dup(pattern.dl_typ.is_some())?;
            pattern.dl_typ = Some(payload.value as u16);
        }
        (NXM_CLASS_OF, F_VLAN_TCI) => {
            expect_width(2)?;
            dup(pattern.dl_vlan.is_some())?;
            apply_vlan_tci(
                pattern,
                header,
                payload.value as u16,
                payload.mask.map(|m| m as u16),
            )?;
        }
        (NXM_CLASS_OF, F_IP_TOS) => {
            expect_width(1)?;
            no_mask(hasmask)?;
            if !prereq_ip(pattern) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            dup(pattern.nw_tos.is_some())?;
            if payload.value & 0x03 != 0 {
                return Err(bad_entry(header, MatchEntryError::BadValue));
            }
            pattern.nw_tos = Some(payload.value as u8);
        }
        (NXM_CLASS_OF, F_IP_PROTO) => {
            expect_width(1)?;
            no_mask(hasmask)?;
            if !prereq_ip(pattern) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            dup(pattern.nw_proto.is_some())?;
            pattern.nw_proto = Some(payload.value as u8);
        }
        (NXM_CLASS_OF, F_IP_SRC) | (NXM_CLASS_OF, F_IP_DST) => {
            expect_width(4)?;
            if pattern.dl_typ != Some(ETH_TYPE_IP) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            let slot = if field == F_IP_SRC {
                &mut pattern.nw_src
            } else {
                &mut pattern.nw_dst
            };
            dup(slot.is_some())?;
            *slot = Some(ipv4_mask_entry(header, payload)?);
        }
        (NXM_CLASS_OF, F_TCP_SRC) | (NXM_CLASS_OF, F_TCP_DST) => {
            tp_entry(pattern, header, field == F_TCP_SRC, 6, width, hasmask, payload)?
        }
        (NXM_CLASS_OF, F_UDP_SRC) | (NXM_CLASS_OF, F_UDP_DST) => {
            tp_entry(pattern, header, field == F_UDP_SRC, 17, width, hasmask, payload)?
        }
        (NXM_CLASS_OF, F_ICMP_TYPE) | (NXM_CLASS_OF, F_ICMP_CODE) => {
            expect_width(1)?;
            no_mask(hasmask)?;
            if !prereq_proto(pattern, 1) && !prereq_proto(pattern, 58) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            let slot = if field == F_ICMP_TYPE {
                &mut pattern.tp_src
            } else {
                &mut pattern.tp_dst
            };
            dup(slot.is_some())?;
            *slot = Some(payload.value as u16);
        }
        (NXM_CLASS_OF, F_ARP_OP) => {
            expect_width(2)?;
            no_mask(hasmask)?;
            if pattern.dl_typ != Some(ETH_TYPE_ARP) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            dup(pattern.nw_proto.is_some())?;
            if payload.value > 0xff {
                return Err(bad_entry(header, MatchEntryError::BadValue));
            }
            pattern.nw_proto = Some(payload.value as u8);
        }
        (NXM_CLASS_OF, F_ARP_SPA) | (NXM_CLASS_OF, F_ARP_TPA) => {
            expect_width(4)?;
            if pattern.dl_typ != Some(ETH_TYPE_ARP) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            let slot = if field == F_ARP_SPA {
                &mut pattern.nw_src
            } else {
                &mut pattern.nw_dst
            };
            dup(slot.is_some())?;
            *slot = Some(ipv4_mask_entry(header, payload)?);
        }
        (NXM_CLASS_NX, f) if f < 4 => {
            expect_width(4)?;
            let slot = &mut pattern.regs[f as usize];
            dup(slot.is_some())?;
            *slot = Some(bitmask_entry_u32(payload));
        }
        (NXM_CLASS_NX, F_TUN_ID) => {
            expect_width(8)?;
            dup(pattern.tun_id.is_some())?;
            pattern.tun_id = Some(bitmask_entry_u64(payload));
        }
        (NXM_CLASS_NX, F_ARP_SHA) | (NXM_CLASS_NX, F_ARP_THA) => {
            expect_width(6)?;
            no_mask(hasmask)?;
            if pattern.dl_typ != Some(ETH_TYPE_ARP) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            let slot = if field == F_ARP_SHA {
                &mut pattern.arp_sha
            } else {
                &mut pattern.arp_tha
            };
            dup(slot.is_some())?;
            *slot = Some(payload.value);
        }
        (NXM_CLASS_NX, F_IPV6_SRC) | (NXM_CLASS_NX, F_IPV6_DST) => {
            expect_width(16)?;
            if pattern.dl_typ != Some(ETH_TYPE_IPV6) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            let slot = if field == F_IPV6_SRC {
                &mut pattern.ipv6_src
            } else {
                &mut pattern.ipv6_dst
            };
            dup(slot.is_some())?;
            let mask = match payload.mask128 {
                None => None,
                Some(m) => Some(
                    cidr_wild_bits(m, 128)
                        .ok_or_else(|| bad_entry(header, MatchEntryError::BadMask))?
                        as u128,
                ),
            };
            let mask = match mask {
                Some(0) => None,
                other => other,
            };
            *slot = Some(Mask {
                value: payload.value128,
                mask,
            });
        }
        (NXM_CLASS_NX, F_ND_TARGET) => {
            expect_width(16)?;
            no_mask(hasmask)?;
            if !prereq_proto(pattern, 58)
                || !matches!(pattern.tp_src, Some(135) | Some(136))
            {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            dup(pattern.nd_target.is_some())?;
            pattern.nd_target = Some(payload.value128);
        }
        (NXM_CLASS_NX, F_IP_FRAG) => {
            expect_width(1)?;
            if !prereq_ip(pattern) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            dup(pattern.ip_frag.is_some())?;
            if payload.value > 3 {
                return Err(bad_entry(header, MatchEntryError::BadValue));
            }
            if let Some(m) = payload.mask {
                if m > 3 {
                    return Err(bad_entry(header, MatchEntryError::BadMask));
                }
            }
            pattern.ip_frag = Some(payload.value as u8);
        }
        (NXM_CLASS_NX, F_COOKIE) => {
            expect_width(8)?;
            if !with_cookie {
                return Err(bad_entry(header, MatchEntryError::BadField));
            }
            if *cookie_mask != 0 {
                return Err(bad_entry(header, MatchEntryError::DupField));
            }
            *cookie = payload.value;
            *cookie_mask = payload.mask.unwrap_or(u64::MAX);
        }
        (NXM_CLASS_NX, F_MPLS_LABEL) => {
            expect_width(4)?;
            no_mask(hasmask)?;
            if !matches!(pattern.dl_typ, Some(ETH_TYPE_MPLS) | Some(ETH_TYPE_MPLS_MCAST)) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            dup(pattern.mpls_label.is_some())?;
            if payload.value > 0xfffff {
                return Err(bad_entry(header, MatchEntryError::BadValue));
            }
            pattern.mpls_label = Some(payload.value as u32);
        }
        (NXM_CLASS_NX, F_MPLS_TC) => {
            expect_width(1)?;
            no_mask(hasmask)?;
            if !matches!(pattern.dl_typ, Some(ETH_TYPE_MPLS) | Some(ETH_TYPE_MPLS_MCAST)) {
                return Err(bad_entry(header, MatchEntryError::BadPrereq));
            }
            dup(pattern.mpls_tc.is_some())?;
            if payload.value > 7 {
                return Err(bad_entry(header, MatchEntryError::BadValue));
            }
            pattern.mpls_tc = Some(payload.value as u8);
        }
        _ => return Err(bad_entry(header, MatchEntryError::BadField)),
    }
    Ok(())
}

fn tp_entry(
    pattern: &mut Pattern,
    header: u32,
    src: bool,
    proto: u8,
    width: usize,
    hasmask: bool,
    payload: &FieldPayload,
) -> Result<(), OfpSerializationError> {
    if width != 2 {
        return Err(bad_entry(header, MatchEntryError::BadLength));
    }
    if hasmask {
        return Err(bad_entry(header, MatchEntryError::BadMask));
    }
    if !prereq_proto(pattern, proto) {
        return Err(bad_entry(header, MatchEntryError::BadPrereq));
    }
    let slot = if src {
        &mut pattern.tp_src
    } else {
        &mut pattern.tp_dst
    };
    if slot.is_some() {
        return Err(bad_entry(header, MatchEntryError::DupField));
    }
    *slot = Some(payload.value as u16);
    Ok(())
}

fn ipv4_mask_entry(
    header: u32,
    payload: &FieldPayload,
) -> Result<Mask<u32>, OfpSerializationError> {
    let mask = match payload.mask {
        None => None,
        Some(m) => {
            let wild = cidr_wild_bits(m as u128, 32)
                .ok_or_else(|| bad_entry(header, MatchEntryError::BadMask))?;
            if wild == 0 {
                None
            } else {
                Some(wild)
            }
        }
    };
    Ok(Mask {
        value: payload.value as u32,
        mask,
    })
}

/// Registers and tunnel ids take arbitrary bitmasks; an all-ones mask
/// normalizes to exact and an all-zero mask to "significant bits: none".
fn bitmask_entry_u32(payload: &FieldPayload) -> Mask<u32> {
    match payload.mask {
        None | Some(0xffff_ffff) => Mask::exact(payload.value as u32),
        Some(m) => Mask::masked(payload.value as u32 & m as u32, m as u32),
    }
}

fn bitmask_entry_u64(payload: &FieldPayload) -> Mask<u64> {
    match payload.mask {
        None | Some(u64::MAX) => Mask::exact(payload.value),
        Some(m) => Mask::masked(payload.value & m, m),
    }
}

fn apply_vlan_tci(
    pattern: &mut Pattern,
    header: u32,
    value: u16,
    mask: Option<u16>,
) -> Result<(), OfpSerializationError> {
    match mask {
        None => {
            if value == 0 {
                pattern.dl_vlan = Some(None);
            } else if value & VLAN_CFI != 0 {
                pattern.dl_vlan = Some(Some(value & 0x0fff));
                pattern.dl_vlan_pcp = Some((value >> 13) as u8);
            } else {
                return Err(bad_entry(header, MatchEntryError::BadValue));
            }
        }
        Some(0x1fff) => {
            if value & VLAN_CFI == 0 {
                return Err(bad_entry(header, MatchEntryError::BadValue));
            }
            pattern.dl_vlan = Some(Some(value & 0x0fff));
        }
        Some(0xf000) => {
            if value & VLAN_CFI == 0 {
                return Err(bad_entry(header, MatchEntryError::BadValue));
            }
            pattern.dl_vlan_pcp = Some((value >> 13) as u8);
            // Tagged with any vid: leave dl_vlan wildcarded.
        }
        Some(_) => return Err(bad_entry(header, MatchEntryError::BadMask)),
    }
    Ok(())
}

fn put_entry(bytes: &mut Vec<u8>, class: u16, field: u8, value: &[u8], mask: Option<&[u8]>) {
    let len = value.len() + mask.map_or(0, |m| m.len());
    let header = nxm_header(class, field, mask.is_some(), len as u8);
    let mut hdr = [0u8; 4];
    BigEndian::write_u32(&mut hdr, header);
    bytes.extend_from_slice(&hdr);
    bytes.extend_from_slice(value);
    if let Some(m) = mask {
        bytes.extend_from_slice(m);
    }
}

fn be16(v: u16) -> [u8; 2] {
    v.to_be_bytes()
}

fn be32(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

fn be64(v: u64) -> [u8; 8] {
    v.to_be_bytes()
}

fn be128(v: u128) -> [u8; 16] {
    v.to_be_bytes()
}

/// Append the TLV encoding of `pattern` (and an optional cookie entry) to
/// `bytes`, in prerequisite order, padding the result to 8-byte alignment.
/// Returns the match length *before* padding, which is what the enclosing
/// message's `match_len` field carries.
pub fn put_match(
    bytes: &mut Vec<u8>,
    pattern: &Pattern,
    cookie: Option<(u64, u64)>,
    encoding: MatchEncoding,
) -> usize {
    let start = bytes.len();
    let oxm = encoding == MatchEncoding::Oxm;
    let basic = if oxm { OXM_CLASS_BASIC } else { NXM_CLASS_OF };

    if let Some(port) = pattern.in_port {
        if oxm {
            put_entry(bytes, basic, OXM_IN_PORT, &be32(port as u32), None);
        } else {
            put_entry(bytes, basic, F_IN_PORT, &be16(port), None);
        }
    }
    if let Some(mac) = pattern.dl_dst {
        let f = if oxm { OXM_ETH_DST } else { F_ETH_DST };
        put_entry(bytes, basic, f, &bytes_of_mac(mac), None);
    }
    if let Some(mac) = pattern.dl_src {
        let f = if oxm { OXM_ETH_SRC } else { F_ETH_SRC };
        put_entry(bytes, basic, f, &bytes_of_mac(mac), None);
    }
    put_vlan(bytes, pattern, oxm);
    if let Some(t) = pattern.dl_typ {
        let f = if oxm { OXM_ETH_TYPE } else { F_ETH_TYPE };
        put_entry(bytes, basic, f, &be16(t), None);
    }
    if let Some(tos) = pattern.nw_tos {
        if oxm {
            put_entry(bytes, basic, OXM_IP_DSCP, &[tos >> 2], None);
        } else {
            put_entry(bytes, basic, F_IP_TOS, &[tos], None);
        }
    }
    let is_arp = pattern.dl_typ == Some(ETH_TYPE_ARP);
    if let Some(proto) = pattern.nw_proto {
        if is_arp {
            let f = if oxm { OXM_ARP_OP } else { F_ARP_OP };
            put_entry(bytes, basic, f, &be16(proto as u16), None);
        } else {
            let f = if oxm { OXM_IP_PROTO } else { F_IP_PROTO };
            put_entry(bytes, basic, f, &[proto], None);
        }
    }
    if let Some(ref m) = pattern.nw_src {
        let f = match (is_arp, oxm) {
            (true, true) => OXM_ARP_SPA,
            (true, false) => F_ARP_SPA,
            (false, true) => OXM_IPV4_SRC,
            (false, false) => F_IP_SRC,
        };
        put_ipv4(bytes, basic, f, m);
    }
    if let Some(ref m) = pattern.nw_dst {
        let f = match (is_arp, oxm) {
            (true, true) => OXM_ARP_TPA,
            (true, false) => F_ARP_TPA,
            (false, true) => OXM_IPV4_DST,
            (false, false) => F_IP_DST,
        };
        put_ipv4(bytes, basic, f, m);
    }
    if let Some(ref m) = pattern.ipv6_src {
        put_ipv6(bytes, oxm, true, m);
    }
    if let Some(ref m) = pattern.ipv6_dst {
        put_ipv6(bytes, oxm, false, m);
    }
    if let (Some(tp), Some(proto)) = (pattern.tp_src, pattern.nw_proto) {
        put_tp(bytes, basic, oxm, proto, true, tp);
    }
    if let (Some(tp), Some(proto)) = (pattern.tp_dst, pattern.nw_proto) {
        put_tp(bytes, basic, oxm, proto, false, tp);
    }
    if let Some(t) = pattern.nd_target {
        let (c, f) = if oxm {
            (OXM_CLASS_BASIC, OXM_ND_TARGET)
        } else {
            (NXM_CLASS_NX, F_ND_TARGET)
        };
        put_entry(bytes, c, f, &be128(t), None);
    }
    if let Some(mac) = pattern.arp_sha {
        let (c, f) = if oxm {
            (OXM_CLASS_BASIC, OXM_ARP_SHA)
        } else {
            (NXM_CLASS_NX, F_ARP_SHA)
        };
        put_entry(bytes, c, f, &bytes_of_mac(mac), None);
    }
    if let Some(mac) = pattern.arp_tha {
        let (c, f) = if oxm {
            (OXM_CLASS_BASIC, OXM_ARP_THA)
        } else {
            (NXM_CLASS_NX, F_ARP_THA)
        };
        put_entry(bytes, c, f, &bytes_of_mac(mac), None);
    }
    if let Some(frag) = pattern.ip_frag {
        put_entry(bytes, NXM_CLASS_NX, F_IP_FRAG, &[frag], None);
    }
    if let Some(label) = pattern.mpls_label {
        let (c, f) = if oxm {
            (OXM_CLASS_BASIC, OXM_MPLS_LABEL)
        } else {
            (NXM_CLASS_NX, F_MPLS_LABEL)
        };
        put_entry(bytes, c, f, &be32(label), None);
    }
    if let Some(tc) = pattern.mpls_tc {
        let (c, f) = if oxm {
            (OXM_CLASS_BASIC, OXM_MPLS_TC)
        } else {
            (NXM_CLASS_NX, F_MPLS_TC)
        };
        put_entry(bytes, c, f, &[tc], None);
    }
    for (i, reg) in pattern.regs.iter().enumerate() {
        if let Some(ref m) = reg {
            match m.mask {
                None => put_entry(bytes, NXM_CLASS_NX, F_REG0 + i as u8, &be32(m.value), None),
                Some(mask) => put_entry(
                    bytes,
                    NXM_CLASS_NX,
                    F_REG0 + i as u8,
                    &be32(m.value),
                    Some(&be32(mask)),
                ),
            }
        }
    }
    if let Some(ref m) = pattern.tun_id {
        match m.mask {
            None => put_entry(bytes, NXM_CLASS_NX, F_TUN_ID, &be64(m.value), None),
            Some(mask) => put_entry(bytes, NXM_CLASS_NX, F_TUN_ID, &be64(m.value), Some(&be64(mask))),
        }
    }
    if let Some((cookie, cookie_mask)) = cookie {
        if cookie_mask == u64::MAX {
            put_entry(bytes, NXM_CLASS_NX, F_COOKIE, &be64(cookie), None);
        } else if cookie_mask != 0 {
            put_entry(
                bytes,
                NXM_CLASS_NX,
                F_COOKIE,
                &be64(cookie),
                Some(&be64(cookie_mask)),
            );
        }
    }

    let match_len = bytes.len() - start;
    while (bytes.len() - start) % 8 != 0 {
        bytes.push(0);
    }
    match_len
}

fn put_vlan(bytes: &mut Vec<u8>, pattern: &Pattern, oxm: bool) {
    let basic = if oxm { OXM_CLASS_BASIC } else { NXM_CLASS_OF };
    let f = if oxm { OXM_VLAN_VID } else { F_VLAN_TCI };
    if oxm {
        // OXM splits vid and pcp into separate entries.
        match pattern.dl_vlan {
            None => {}
            Some(None) => put_entry(bytes, basic, f, &be16(0), None),
            Some(Some(vid)) => put_entry(bytes, basic, f, &be16(VLAN_CFI | vid), None),
        }
        if let Some(pcp) = pattern.dl_vlan_pcp {
            put_entry(bytes, basic, OXM_VLAN_PCP, &[pcp], None);
        }
        return;
    }
    match (pattern.dl_vlan, pattern.dl_vlan_pcp) {
        (None, None) => {}
        (Some(None), _) => put_entry(bytes, basic, f, &be16(0), None),
        (Some(Some(vid)), Some(pcp)) => put_entry(
            bytes,
            basic,
            f,
            &be16(VLAN_CFI | ((pcp as u16) << 13) | vid),
            None,
        ),
        (Some(Some(vid)), None) => put_entry(
            bytes,
            basic,
            f,
            &be16(VLAN_CFI | vid),
            Some(&be16(0x1fff)),
        ),
        (None, Some(pcp)) => put_entry(
            bytes,
            basic,
            f,
            &be16(VLAN_CFI | ((pcp as u16) << 13)),
            Some(&be16(0xf000)),
        ),
    }
}

fn put_ipv4(bytes: &mut Vec<u8>, class: u16, field: u8, m: &Mask<u32>) {
    match m.mask {
        None => put_entry(bytes, class, field, &be32(m.value), None),
        Some(wild) => {
            let mask = (!low_bits(wild.min(32)) as u32) & 0xffff_ffff;
            put_entry(bytes, class, field, &be32(m.value & mask), Some(&be32(mask)));
        }
    }
}

fn put_ipv6(bytes: &mut Vec<u8>, oxm: bool, src: bool, m: &Mask<u128>) {
    let (class, field) = match (oxm, src) {
        (true, true) => (OXM_CLASS_BASIC, OXM_IPV6_SRC),
        (true, false) => (OXM_CLASS_BASIC, OXM_IPV6_DST),
        (false, true) => (NXM_CLASS_NX, F_IPV6_SRC),
        (false, false) => (NXM_CLASS_NX, F_IPV6_DST),
    };
    match m.mask {
        None => put_entry(bytes, class, field, &be128(m.value), None),
        Some(wild) => {
            let wild: u32 = wild.try_into().unwrap_or(128);
            let mask = if wild >= 128 { 0 } else { !0u128 << wild };
            put_entry(
                bytes,
                class,
                field,
                &be128(m.value & mask),
                Some(&be128(mask)),
            );
        }
    }
}

fn put_tp(bytes: &mut Vec<u8>, basic: u16, oxm: bool, proto: u8, src: bool, tp: u16) {
    let field = match (proto, src, oxm) {
        (6, true, false) => F_TCP_SRC,
        (6, false, false) => F_TCP_DST,
        (17, true, false) => F_UDP_SRC,
        (17, false, false) => F_UDP_DST,
        (1, true, false) | (58, true, false) => F_ICMP_TYPE,
        (1, false, false) | (58, false, false) => F_ICMP_CODE,
        (6, true, true) => OXM_TCP_SRC,
        (6, false, true) => OXM_TCP_DST,
        (17, true, true) => OXM_UDP_SRC,
        (17, false, true) => OXM_UDP_DST,
        (1, true, true) | (58, true, true) => OXM_ICMP_TYPE,
        (1, false, true) | (58, false, true) => OXM_ICMP_CODE,
        // Transport ports over other protocols have no TLV form.
        _ => return,
    };
    if (proto == 1 || proto == 58) && !oxm {
        put_entry(bytes, NXM_CLASS_OF, field, &[tp as u8], None);
    } else if proto == 1 || proto == 58 {
        put_entry(bytes, OXM_CLASS_BASIC, field, &[tp as u8], None);
    } else {
        put_entry(bytes, basic, field, &be16(tp), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(pattern: &Pattern, encoding: MatchEncoding) -> Pattern {
        let mut bytes = Vec::new();
        let match_len = put_match(&mut bytes, pattern, None, encoding);
        let parsed = parse(&bytes, match_len, ParseMode::Strict, false).unwrap();
        parsed.pattern
    }

    #[test]
    fn empty_match_is_catch_all() {
        let parsed = parse(&[], 0, ParseMode::Strict, false).unwrap();
        assert_eq!(parsed.pattern, Pattern::match_all());
        assert_eq!(parsed.cookie_mask, 0);
    }

    #[test]
    fn basic_tuple_roundtrip() {
        let mut pattern = Pattern::match_all();
        pattern.in_port = Some(3);
        pattern.dl_src = Some(0x001122334455);
        pattern.dl_dst = Some(0x665544332211);
        pattern.dl_typ = Some(0x0800);
        pattern.nw_proto = Some(6);
        pattern.nw_src = Some(Mask::masked(0x0a000000, 8)); // 10.0.0.0/24
        pattern.tp_dst = Some(80);
        assert_eq!(roundtrip(&pattern, MatchEncoding::Nxm), pattern);
        assert_eq!(roundtrip(&pattern, MatchEncoding::Oxm), pattern);
    }

    #[test]
    fn vendor_fields_roundtrip() {
        let mut pattern = Pattern::match_all();
        pattern.tun_id = Some(Mask::masked(0x10, 0xff));
        pattern.regs[0] = Some(Mask::exact(42));
        pattern.regs[2] = Some(Mask::masked(0x0100, 0xff00));
        assert_eq!(roundtrip(&pattern, MatchEncoding::Nxm), pattern);
    }

    #[test]
    fn arp_fields_roundtrip() {
        let mut pattern = Pattern::match_all();
        pattern.dl_typ = Some(0x0806);
        pattern.nw_proto = Some(2); // ARP opcode travels as arp_op
        pattern.nw_src = Some(Mask::exact(0x0a000001));
        pattern.arp_sha = Some(0xaabbccddeeff);
        assert_eq!(roundtrip(&pattern, MatchEncoding::Nxm), pattern);
    }

    #[test]
    fn ipv6_prefix_roundtrip() {
        let mut pattern = Pattern::match_all();
        pattern.dl_typ = Some(0x86dd);
        pattern.ipv6_dst = Some(Mask::masked(0x20010db8 << 96, 64));
        assert_eq!(roundtrip(&pattern, MatchEncoding::Nxm), pattern);
        assert_eq!(roundtrip(&pattern, MatchEncoding::Oxm), pattern);
    }

    #[test]
    fn cookie_entry_is_extracted() {
        let mut bytes = Vec::new();
        let match_len = put_match(
            &mut bytes,
            &Pattern::match_all(),
            Some((0xdead, 0xffff)),
            MatchEncoding::Nxm,
        );
        let parsed = parse(&bytes, match_len, ParseMode::Strict, true).unwrap();
        assert_eq!(parsed.cookie, 0xdead);
        assert_eq!(parsed.cookie_mask, 0xffff);
        assert_eq!(parsed.pattern, Pattern::match_all());
    }

    #[test]
    fn cookie_outside_flow_mod_is_unknown_field() {
        let mut bytes = Vec::new();
        let match_len = put_match(
            &mut bytes,
            &Pattern::match_all(),
            Some((1, u64::MAX)),
            MatchEncoding::Nxm,
        );
        let err = parse(&bytes, match_len, ParseMode::Strict, false).unwrap_err();
        assert!(matches!(
            err,
            OfpSerializationError::BadMatchEntry {
                kind: MatchEntryError::BadField,
                ..
            }
        ));
        // Loose mode skips it instead.
        let parsed = parse(&bytes, match_len, ParseMode::Loose, false).unwrap();
        assert_eq!(parsed.pattern, Pattern::match_all());
    }

    #[test]
    fn partial_header_is_rejected() {
        let bytes = [0u8; 8];
        let err = parse(&bytes, 3, ParseMode::Strict, false).unwrap_err();
        assert!(matches!(err, OfpSerializationError::BadLength { .. }));
    }

    #[test]
    fn zero_payload_length_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&nxm_header(NXM_CLASS_OF, F_ETH_TYPE, false, 0).to_be_bytes());
        bytes.extend_from_slice(&[0; 4]);
        let err = parse(&bytes, 8, ParseMode::Strict, false).unwrap_err();
        assert!(matches!(
            err,
            OfpSerializationError::BadMatchEntry {
                kind: MatchEntryError::BadLength,
                ..
            }
        ));
    }

    #[test]
    fn missing_prereq_is_rejected() {
        // tcp_src without eth_type/ip_proto.
        let mut bytes = Vec::new();
        put_entry(&mut bytes, NXM_CLASS_OF, F_TCP_SRC, &be16(80), None);
        let err = parse(&bytes, 8, ParseMode::Strict, false).unwrap_err();
        assert!(matches!(
            err,
            OfpSerializationError::BadMatchEntry {
                kind: MatchEntryError::BadPrereq,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let mut bytes = Vec::new();
        put_entry(&mut bytes, NXM_CLASS_OF, F_ETH_TYPE, &be16(0x0800), None);
        put_entry(&mut bytes, NXM_CLASS_OF, F_ETH_TYPE, &be16(0x0806), None);
        let err = parse(&bytes, 16, ParseMode::Strict, false).unwrap_err();
        assert!(matches!(
            err,
            OfpSerializationError::BadMatchEntry {
                kind: MatchEntryError::DupField,
                ..
            }
        ));
    }

    #[test]
    fn non_cidr_ip_mask_is_rejected() {
        let mut bytes = Vec::new();
        put_entry(&mut bytes, NXM_CLASS_OF, F_ETH_TYPE, &be16(0x0800), None);
        put_entry(
            &mut bytes,
            NXM_CLASS_OF,
            F_IP_SRC,
            &be32(0x0a000001),
            Some(&be32(0x00ff00ff)),
        );
        let err = parse(&bytes, bytes.len(), ParseMode::Strict, false).unwrap_err();
        assert!(matches!(
            err,
            OfpSerializationError::BadMatchEntry {
                kind: MatchEntryError::BadMask,
                ..
            }
        ));
    }

    #[test]
    fn oxm_in_port_over_16_bits_is_rejected() {
        let mut bytes = Vec::new();
        put_entry(&mut bytes, OXM_CLASS_BASIC, OXM_IN_PORT, &be32(0x10000), None);
        let err = parse(&bytes, 8, ParseMode::Strict, false).unwrap_err();
        assert!(matches!(
            err,
            OfpSerializationError::BadMatchEntry {
                kind: MatchEntryError::BadValue,
                ..
            }
        ));
    }

    #[test]
    fn match_len_is_unpadded_and_buffer_is_padded() {
        let mut pattern = Pattern::match_all();
        pattern.in_port = Some(1); // 6-byte entry -> padded to 8
        let mut bytes = Vec::new();
        let match_len = put_match(&mut bytes, &pattern, None, MatchEncoding::Nxm);
        assert_eq!(match_len, 6);
        assert_eq!(bytes.len(), 8);
        assert_eq!(padded_match_len(match_len), 8);
    }
}
