//! Nicira vendor extensions: vendor messages, vendor actions, and the
//! NXM-based vendor statistics formats.
//!
//! All of them travel under vendor id 0x00002320. Vendor actions appear
//! inside ordinary action lists with action type 0xffff; vendor messages
//! use the OpenFlow `Vendor` message type; vendor stats use stats type
//! 0xffff with a subtype word after the vendor id.

use std::io::{BufRead, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Buf;

use crate::message::*;
use crate::nx_match::{self, MatchEncoding, ParseMode};
use crate::ofp_message::{ActionEntryError, OfpSerializationError};
use crate::ofp_utils::write_padding_bytes;
use crate::openflow0x01::{Action0x01, PseudoPort0x01};

pub const NX_VENDOR_ID: u32 = 0x00002320;

// Vendor message subtypes.
const NXT_TUN_ID_FROM_COOKIE: u32 = 7;
const NXT_ROLE_REQUEST: u32 = 10;
const NXT_ROLE_REPLY: u32 = 11;
const NXT_SET_FLOW_FORMAT: u32 = 12;
const NXT_FLOW_MOD: u32 = 13;
const NXT_FLOW_REMOVED: u32 = 14;
const NXT_FLOW_MOD_TABLE_ID: u32 = 15;
const NXT_SET_PACKET_IN_FORMAT: u32 = 16;
const NXT_PACKET_IN: u32 = 17;
const NXT_FLOW_AGE: u32 = 18;
const NXT_SET_ASYNC_CONFIG: u32 = 19;
const NXT_SET_CONTROLLER_ID: u32 = 20;

// Vendor action subtypes.
const NXAST_SET_TUNNEL: u16 = 2;
const NXAST_SET_QUEUE: u16 = 4;
const NXAST_POP_QUEUE: u16 = 5;
const NXAST_REG_MOVE: u16 = 6;
const NXAST_REG_LOAD: u16 = 7;
const NXAST_NOTE: u16 = 8;
const NXAST_SET_TUNNEL64: u16 = 9;
const NXAST_MULTIPATH: u16 = 10;
const NXAST_AUTOPATH: u16 = 11;
const NXAST_BUNDLE: u16 = 12;
const NXAST_OUTPUT_REG: u16 = 14;
const NXAST_LEARN: u16 = 15;
const NXAST_EXIT: u16 = 16;
const NXAST_DEC_TTL: u16 = 17;
const NXAST_FIN_TIMEOUT: u16 = 18;
const NXAST_CONTROLLER: u16 = 19;
const NXAST_PUSH_MPLS: u16 = 23;
const NXAST_POP_MPLS: u16 = 24;
const NXAST_SET_MPLS_LABEL: u16 = 25;
const NXAST_SET_MPLS_TC: u16 = 26;
const NXAST_SET_MPLS_TTL: u16 = 27;
const NXAST_DEC_MPLS_TTL: u16 = 28;
const NXAST_PUSH_VLAN: u16 = 29;

// Vendor stats subtypes.
pub const NXST_FLOW: u32 = 0;
pub const NXST_AGGREGATE: u32 = 1;

fn bad_action(kind: ActionEntryError, detail: &str) -> OfpSerializationError {
    OfpSerializationError::BadActionEntry {
        kind,
        detail: detail.to_string(),
    }
}

/// Pack a bit-range reference as the NX `ofs_nbits` form.
fn ofs_nbits(ofs: u16, nbits: u16) -> u16 {
    (ofs << 6) | (nbits - 1)
}

fn split_ofs_nbits(v: u16) -> (u16, u16) {
    (v >> 6, (v & 0x3f) + 1)
}

/// Byte size of a vendor action, header included.
pub fn nx_action_size(a: &Action) -> usize {
    match *a {
        Action::SetTunnel(v) if v <= u32::MAX as u64 => 16,
        Action::SetTunnel(_) => 24,
        Action::SetQueue(_) | Action::PopQueue => 16,
        Action::RegMove { .. } | Action::RegLoad { .. } => 24,
        Action::Note(ref data) => {
            let unpadded = 10 + data.len();
            ((unpadded + 7) / 8 * 8).max(16)
        }
        Action::Multipath { .. } => 32,
        Action::Autopath { .. } => 24,
        Action::Bundle { ref slaves, .. } => 32 + (slaves.len() * 2 + 7) / 8 * 8,
        Action::OutputReg { .. } => 24,
        Action::Learn { ref spec, .. } => 28 + spec.len(),
        Action::Exit | Action::DecTtl => 16,
        Action::FinTimeout { .. } => 16,
        Action::Controller { .. } => 16,
        Action::PushMpls(_)
        | Action::PopMpls(_)
        | Action::SetMplsLabel(_)
        | Action::SetMplsTc(_)
        | Action::SetMplsTtl(_)
        | Action::DecMplsTtl
        | Action::PushVlan(_) => 16,
        // Instruction-style actions have no 1.0 vendor encoding; marshaling
        // reports the version gap.
        Action::GotoTable(_) | Action::WriteMetadata { .. } | Action::ClearActions => 8,
        _ => 8,
    }
}

/// Parse one vendor action. The cursor sits just past the 4-byte action
/// header; `body_len` counts the remaining bytes of the action.
pub fn parse_nx_action(
    bytes: &mut Cursor<Vec<u8>>,
    body_len: usize,
) -> Result<Action, OfpSerializationError> {
    if body_len < 6 {
        return Err(bad_action(ActionEntryError::BadLength, "vendor action header"));
    }
    let vendor = bytes.read_u32::<BigEndian>()?;
    if vendor != NX_VENDOR_ID {
        return Err(bad_action(
            ActionEntryError::BadVendor,
            &format!("0x{:08x}", vendor),
        ));
    }
    let subtype = bytes.read_u16::<BigEndian>()?;
    let rest = body_len - 6;
    let action = match subtype {
        NXAST_SET_TUNNEL => {
            bytes.consume(2);
            Action::SetTunnel(bytes.read_u32::<BigEndian>()? as u64)
        }
        NXAST_SET_TUNNEL64 => {
            bytes.consume(6);
            Action::SetTunnel(bytes.read_u64::<BigEndian>()?)
        }
        NXAST_SET_QUEUE => {
            bytes.consume(2);
            Action::SetQueue(bytes.read_u32::<BigEndian>()?)
        }
        NXAST_POP_QUEUE => {
            bytes.consume(6);
            Action::PopQueue
        }
        NXAST_REG_MOVE => {
            let n_bits = bytes.read_u16::<BigEndian>()?;
            let src_ofs = bytes.read_u16::<BigEndian>()?;
            let dst_ofs = bytes.read_u16::<BigEndian>()?;
            let src = bytes.read_u32::<BigEndian>()?;
            let dst = bytes.read_u32::<BigEndian>()?;
            Action::RegMove {
                src,
                dst,
                n_bits,
                src_ofs,
                dst_ofs,
            }
        }
        NXAST_REG_LOAD => {
            let packed = bytes.read_u16::<BigEndian>()?;
            let dst = bytes.read_u32::<BigEndian>()?;
            let value = bytes.read_u64::<BigEndian>()?;
            let (ofs, nbits) = split_ofs_nbits(packed);
            Action::RegLoad {
                dst,
                ofs,
                nbits,
                value,
            }
        }
        NXAST_NOTE => {
            let mut data = vec![0; rest];
            bytes.read_exact(&mut data)?;
            // Trailing zero bytes are alignment padding, not note content.
            while data.last() == Some(&0) {
                data.pop();
            }
            Action::Note(data)
        }
        NXAST_MULTIPATH => {
            let fields = bytes.read_u16::<BigEndian>()?;
            let basis = bytes.read_u16::<BigEndian>()?;
            bytes.consume(2);
            let algorithm = bytes.read_u16::<BigEndian>()?;
            let max_link = bytes.read_u16::<BigEndian>()?;
            let arg = bytes.read_u32::<BigEndian>()?;
            bytes.consume(2);
            let packed = bytes.read_u16::<BigEndian>()?;
            let dst = bytes.read_u32::<BigEndian>()?;
            let (ofs, nbits) = split_ofs_nbits(packed);
            Action::Multipath {
                fields,
                basis,
                algorithm,
                max_link,
                arg,
                ofs,
                nbits,
                dst,
            }
        }
        NXAST_AUTOPATH => {
            bytes.consume(2);
            let id = bytes.read_u32::<BigEndian>()?;
            let packed = bytes.read_u16::<BigEndian>()?;
            let dst = bytes.read_u32::<BigEndian>()?;
            bytes.consume(2);
            let (ofs, nbits) = split_ofs_nbits(packed);
            Action::Autopath {
                id,
                ofs,
                nbits,
                dst,
            }
        }
        NXAST_BUNDLE => {
            let algorithm = bytes.read_u16::<BigEndian>()?;
            let fields = bytes.read_u16::<BigEndian>()?;
            let basis = bytes.read_u16::<BigEndian>()?;
            let slave_type = bytes.read_u32::<BigEndian>()?;
            let n_slaves = bytes.read_u16::<BigEndian>()? as usize;
            let packed = bytes.read_u16::<BigEndian>()?;
            let dst = bytes.read_u32::<BigEndian>()?;
            bytes.consume(4);
            let slaves_area = rest - 22;
            if n_slaves * 2 > slaves_area {
                return Err(bad_action(ActionEntryError::BadLength, "bundle slave list"));
            }
            let mut slaves = Vec::with_capacity(n_slaves);
            for _ in 0..n_slaves {
                slaves.push(bytes.read_u16::<BigEndian>()?);
            }
            bytes.consume(slaves_area - n_slaves * 2);
            let (ofs, nbits) = split_ofs_nbits(packed);
            Action::Bundle {
                algorithm,
                fields,
                basis,
                slave_type,
                ofs,
                nbits,
                dst,
                slaves,
            }
        }
        NXAST_OUTPUT_REG => {
            let packed = bytes.read_u16::<BigEndian>()?;
            let src = bytes.read_u32::<BigEndian>()?;
            let max_len = bytes.read_u16::<BigEndian>()?;
            bytes.consume(6);
            let (ofs, nbits) = split_ofs_nbits(packed);
            Action::OutputReg {
                src,
                ofs,
                nbits,
                max_len,
            }
        }
        NXAST_LEARN => {
            let idle_timeout = bytes.read_u16::<BigEndian>()?;
            let hard_timeout = bytes.read_u16::<BigEndian>()?;
            let priority = bytes.read_u16::<BigEndian>()?;
            let cookie = bytes.read_u64::<BigEndian>()?;
            let flags = bytes.read_u16::<BigEndian>()?;
            let table_id = bytes.read_u8()?;
            bytes.consume(1);
            let mut spec = vec![0; rest - 18];
            bytes.read_exact(&mut spec)?;
            Action::Learn {
                idle_timeout,
                hard_timeout,
                priority,
                cookie,
                flags,
                table_id,
                spec,
            }
        }
        NXAST_EXIT => {
            bytes.consume(6);
            Action::Exit
        }
        NXAST_DEC_TTL => {
            bytes.consume(6);
            Action::DecTtl
        }
        NXAST_FIN_TIMEOUT => {
            let idle = bytes.read_u16::<BigEndian>()?;
            let hard = bytes.read_u16::<BigEndian>()?;
            bytes.consume(2);
            Action::FinTimeout { idle, hard }
        }
        NXAST_CONTROLLER => {
            let max_len = bytes.read_u16::<BigEndian>()?;
            let controller_id = bytes.read_u16::<BigEndian>()?;
            let reason_byte = bytes.read_u8()?;
            bytes.consume(1);
            let reason = PacketInReason::of_int(reason_byte)
                .ok_or_else(|| bad_action(ActionEntryError::BadArgument, "controller reason"))?;
            Action::Controller {
                max_len,
                controller_id,
                reason,
            }
        }
        NXAST_PUSH_MPLS => {
            let ethertype = bytes.read_u16::<BigEndian>()?;
            bytes.consume(4);
            Action::PushMpls(ethertype)
        }
        NXAST_POP_MPLS => {
            let ethertype = bytes.read_u16::<BigEndian>()?;
            bytes.consume(4);
            Action::PopMpls(ethertype)
        }
        NXAST_SET_MPLS_LABEL => {
            let label = bytes.read_u32::<BigEndian>()?;
            bytes.consume(2);
            Action::SetMplsLabel(label)
        }
        NXAST_SET_MPLS_TC => {
            let tc = bytes.read_u8()?;
            bytes.consume(5);
            Action::SetMplsTc(tc)
        }
        NXAST_SET_MPLS_TTL => {
            let ttl = bytes.read_u8()?;
            bytes.consume(5);
            Action::SetMplsTtl(ttl)
        }
        NXAST_DEC_MPLS_TTL => {
            bytes.consume(6);
            Action::DecMplsTtl
        }
        NXAST_PUSH_VLAN => {
            let ethertype = bytes.read_u16::<BigEndian>()?;
            bytes.consume(4);
            Action::PushVlan(ethertype)
        }
        t => {
            return Err(bad_action(
                ActionEntryError::BadVendorType,
                &format!("NXAST {}", t),
            ));
        }
    };
    Ok(action)
}

fn put_nx_action_header(bytes: &mut Vec<u8>, total_len: usize, subtype: u16) {
    bytes.write_u16::<BigEndian>(0xffff).unwrap();
    bytes.write_u16::<BigEndian>(total_len as u16).unwrap();
    bytes.write_u32::<BigEndian>(NX_VENDOR_ID).unwrap();
    bytes.write_u16::<BigEndian>(subtype).unwrap();
}

/// Marshal a vendor action, emitting the 0xffff action header too.
pub fn marshal_nx_action(act: Action, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
    let total = nx_action_size(&act);
    match act {
        Action::SetTunnel(v) if v <= u32::MAX as u64 => {
            put_nx_action_header(bytes, total, NXAST_SET_TUNNEL);
            write_padding_bytes(bytes, 2);
            bytes.write_u32::<BigEndian>(v as u32).unwrap();
        }
        Action::SetTunnel(v) => {
            put_nx_action_header(bytes, total, NXAST_SET_TUNNEL64);
            write_padding_bytes(bytes, 6);
            bytes.write_u64::<BigEndian>(v).unwrap();
        }
        Action::SetQueue(q) => {
            put_nx_action_header(bytes, total, NXAST_SET_QUEUE);
            write_padding_bytes(bytes, 2);
            bytes.write_u32::<BigEndian>(q).unwrap();
        }
        Action::PopQueue => {
            put_nx_action_header(bytes, total, NXAST_POP_QUEUE);
            write_padding_bytes(bytes, 6);
        }
        Action::RegMove {
            src,
            dst,
            n_bits,
            src_ofs,
            dst_ofs,
        } => {
            put_nx_action_header(bytes, total, NXAST_REG_MOVE);
            bytes.write_u16::<BigEndian>(n_bits).unwrap();
            bytes.write_u16::<BigEndian>(src_ofs).unwrap();
            bytes.write_u16::<BigEndian>(dst_ofs).unwrap();
            bytes.write_u32::<BigEndian>(src).unwrap();
            bytes.write_u32::<BigEndian>(dst).unwrap();
        }
        Action::RegLoad {
            dst,
            ofs,
            nbits,
            value,
        } => {
            put_nx_action_header(bytes, total, NXAST_REG_LOAD);
            bytes.write_u16::<BigEndian>(ofs_nbits(ofs, nbits)).unwrap();
            bytes.write_u32::<BigEndian>(dst).unwrap();
            bytes.write_u64::<BigEndian>(value).unwrap();
        }
        Action::Note(data) => {
            put_nx_action_header(bytes, total, NXAST_NOTE);
            bytes.extend_from_slice(&data);
            write_padding_bytes(bytes, total - 10 - data.len());
        }
        Action::Multipath {
            fields,
            basis,
            algorithm,
            max_link,
            arg,
            ofs,
            nbits,
            dst,
        } => {
            put_nx_action_header(bytes, total, NXAST_MULTIPATH);
            bytes.write_u16::<BigEndian>(fields).unwrap();
            bytes.write_u16::<BigEndian>(basis).unwrap();
            write_padding_bytes(bytes, 2);
            bytes.write_u16::<BigEndian>(algorithm).unwrap();
            bytes.write_u16::<BigEndian>(max_link).unwrap();
            bytes.write_u32::<BigEndian>(arg).unwrap();
            write_padding_bytes(bytes, 2);
            bytes.write_u16::<BigEndian>(ofs_nbits(ofs, nbits)).unwrap();
            bytes.write_u32::<BigEndian>(dst).unwrap();
        }
        Action::Autopath { id, ofs, nbits, dst } => {
            put_nx_action_header(bytes, total, NXAST_AUTOPATH);
            write_padding_bytes(bytes, 2);
            bytes.write_u32::<BigEndian>(id).unwrap();
            bytes.write_u16::<BigEndian>(ofs_nbits(ofs, nbits)).unwrap();
            bytes.write_u32::<BigEndian>(dst).unwrap();
            write_padding_bytes(bytes, 2);
        }
        Action::Bundle {
            algorithm,
            fields,
            basis,
            slave_type,
            ofs,
            nbits,
            dst,
            slaves,
        } => {
            put_nx_action_header(bytes, total, NXAST_BUNDLE);
            bytes.write_u16::<BigEndian>(algorithm).unwrap();
            bytes.write_u16::<BigEndian>(fields).unwrap();
            bytes.write_u16::<BigEndian>(basis).unwrap();
            bytes.write_u32::<BigEndian>(slave_type).unwrap();
            bytes.write_u16::<BigEndian>(slaves.len() as u16).unwrap();
            bytes.write_u16::<BigEndian>(ofs_nbits(ofs, nbits)).unwrap();
            bytes.write_u32::<BigEndian>(dst).unwrap();
            write_padding_bytes(bytes, 4);
            let slack = (slaves.len() * 2 + 7) / 8 * 8 - slaves.len() * 2;
            for s in slaves {
                bytes.write_u16::<BigEndian>(s).unwrap();
            }
            write_padding_bytes(bytes, slack);
        }
        Action::OutputReg {
            src,
            ofs,
            nbits,
            max_len,
        } => {
            put_nx_action_header(bytes, total, NXAST_OUTPUT_REG);
            bytes.write_u16::<BigEndian>(ofs_nbits(ofs, nbits)).unwrap();
            bytes.write_u32::<BigEndian>(src).unwrap();
            bytes.write_u16::<BigEndian>(max_len).unwrap();
            write_padding_bytes(bytes, 6);
        }
        Action::Learn {
            idle_timeout,
            hard_timeout,
            priority,
            cookie,
            flags,
            table_id,
            spec,
        } => {
            put_nx_action_header(bytes, total, NXAST_LEARN);
            bytes.write_u16::<BigEndian>(idle_timeout).unwrap();
            bytes.write_u16::<BigEndian>(hard_timeout).unwrap();
            bytes.write_u16::<BigEndian>(priority).unwrap();
            bytes.write_u64::<BigEndian>(cookie).unwrap();
            bytes.write_u16::<BigEndian>(flags).unwrap();
            bytes.write_u8(table_id).unwrap();
            write_padding_bytes(bytes, 1);
            bytes.extend_from_slice(&spec);
        }
        Action::Exit => {
            put_nx_action_header(bytes, total, NXAST_EXIT);
            write_padding_bytes(bytes, 6);
        }
        Action::DecTtl => {
            put_nx_action_header(bytes, total, NXAST_DEC_TTL);
            write_padding_bytes(bytes, 6);
        }
        Action::FinTimeout { idle, hard } => {
            put_nx_action_header(bytes, total, NXAST_FIN_TIMEOUT);
            bytes.write_u16::<BigEndian>(idle).unwrap();
            bytes.write_u16::<BigEndian>(hard).unwrap();
            write_padding_bytes(bytes, 2);
        }
        Action::Controller {
            max_len,
            controller_id,
            reason,
        } => {
            put_nx_action_header(bytes, total, NXAST_CONTROLLER);
            bytes.write_u16::<BigEndian>(max_len).unwrap();
            bytes.write_u16::<BigEndian>(controller_id).unwrap();
            bytes.write_u8(reason as u8).unwrap();
            write_padding_bytes(bytes, 1);
        }
        Action::PushMpls(ethertype) => {
            put_nx_action_header(bytes, total, NXAST_PUSH_MPLS);
            bytes.write_u16::<BigEndian>(ethertype).unwrap();
            write_padding_bytes(bytes, 4);
        }
        Action::PopMpls(ethertype) => {
            put_nx_action_header(bytes, total, NXAST_POP_MPLS);
            bytes.write_u16::<BigEndian>(ethertype).unwrap();
            write_padding_bytes(bytes, 4);
        }
        Action::SetMplsLabel(label) => {
            put_nx_action_header(bytes, total, NXAST_SET_MPLS_LABEL);
            bytes.write_u32::<BigEndian>(label).unwrap();
            write_padding_bytes(bytes, 2);
        }
        Action::SetMplsTc(tc) => {
            put_nx_action_header(bytes, total, NXAST_SET_MPLS_TC);
            bytes.write_u8(tc).unwrap();
            write_padding_bytes(bytes, 5);
        }
        Action::SetMplsTtl(ttl) => {
            put_nx_action_header(bytes, total, NXAST_SET_MPLS_TTL);
            bytes.write_u8(ttl).unwrap();
            write_padding_bytes(bytes, 5);
        }
        Action::DecMplsTtl => {
            put_nx_action_header(bytes, total, NXAST_DEC_MPLS_TTL);
            write_padding_bytes(bytes, 6);
        }
        Action::PushVlan(ethertype) => {
            put_nx_action_header(bytes, total, NXAST_PUSH_VLAN);
            bytes.write_u16::<BigEndian>(ethertype).unwrap();
            write_padding_bytes(bytes, 4);
        }
        Action::GotoTable(_) | Action::WriteMetadata { .. } | Action::ClearActions => {
            return Err(OfpSerializationError::UnimplementedFeatureInVersion {
                version: crate::ofp_header::OPENFLOW_0_01_VERSION,
                feature: "instruction actions".to_string(),
            });
        }
        other => {
            return Err(bad_action(
                ActionEntryError::BadType,
                &format!("{:?} has no vendor encoding", other),
            ));
        }
    }
    Ok(())
}

/// Byte size of a vendor message body (vendor id and subtype included).
pub fn size_of(nx: &NxMessage) -> usize {
    8 + match nx {
        NxMessage::TunIdFromCookie(_) => 8,
        NxMessage::RoleRequest(_) | NxMessage::RoleReply(_) => 4,
        NxMessage::SetFlowFormat(_) => 4,
        NxMessage::FlowMod(fm) => {
            let mut match_bytes = Vec::new();
            let cookie = if fm.cookie_mask != 0 {
                Some((fm.cookie, fm.cookie_mask))
            } else {
                None
            };
            nx_match::put_match(&mut match_bytes, &fm.pattern, cookie, MatchEncoding::Nxm);
            32 + match_bytes.len() + Action0x01::size_of_sequence(&fm.actions)
        }
        NxMessage::FlowRemoved(fr) => {
            let mut match_bytes = Vec::new();
            nx_match::put_match(&mut match_bytes, &fr.pattern, None, MatchEncoding::Nxm);
            40 + match_bytes.len()
        }
        NxMessage::FlowModTableId(_) => 8,
        NxMessage::SetPacketInFormat(_) => 4,
        NxMessage::PacketIn(pi) => {
            let mut pattern = Pattern::match_all();
            pattern.in_port = Some(pi.port);
            let mut match_bytes = Vec::new();
            nx_match::put_match(&mut match_bytes, &pattern, None, MatchEncoding::Nxm);
            24 + match_bytes.len() + 2 + Payload::size_of(&pi.input_payload)
        }
        NxMessage::SetControllerId(_) => 8,
        NxMessage::SetAsyncConfig(_) => 24,
        NxMessage::FlowAge => 0,
    }
}

/// Parse a vendor message body (starting at the vendor id).
pub fn parse(buf: &[u8]) -> Result<NxMessage, OfpSerializationError> {
    let mut bytes = Cursor::new(buf.to_vec());
    let vendor = bytes.read_u32::<BigEndian>()?;
    if vendor != NX_VENDOR_ID {
        return Err(OfpSerializationError::UnexpectedValueError {
            value: format!("0x{:08x}", vendor),
            field: "vendor id".to_string(),
            message: "vendor message".to_string(),
        });
    }
    let subtype = bytes.read_u32::<BigEndian>()?;
    let msg = match subtype {
        NXT_TUN_ID_FROM_COOKIE => {
            let set = bytes.read_u8()? != 0;
            bytes.consume(7);
            NxMessage::TunIdFromCookie(set)
        }
        NXT_ROLE_REQUEST | NXT_ROLE_REPLY => {
            let role_word = bytes.read_u32::<BigEndian>()?;
            let role = ControllerRole::of_int(role_word).ok_or_else(|| {
                OfpSerializationError::UnexpectedValueError {
                    value: format!("{}", role_word),
                    field: "role".to_string(),
                    message: "role request".to_string(),
                }
            })?;
            if subtype == NXT_ROLE_REQUEST {
                NxMessage::RoleRequest(role)
            } else {
                NxMessage::RoleReply(role)
            }
        }
        NXT_SET_FLOW_FORMAT => {
            let format_word = bytes.read_u32::<BigEndian>()?;
            let format = FlowFormat::of_int(format_word).ok_or_else(|| {
                OfpSerializationError::UnexpectedValueError {
                    value: format!("{}", format_word),
                    field: "format".to_string(),
                    message: "set flow format".to_string(),
                }
            })?;
            NxMessage::SetFlowFormat(format)
        }
        NXT_FLOW_MOD => NxMessage::FlowMod(parse_nx_flow_mod(&mut bytes)?),
        NXT_FLOW_REMOVED => NxMessage::FlowRemoved(parse_nx_flow_removed(&mut bytes)?),
        NXT_FLOW_MOD_TABLE_ID => {
            let set = bytes.read_u8()? != 0;
            bytes.consume(7);
            NxMessage::FlowModTableId(set)
        }
        NXT_SET_PACKET_IN_FORMAT => {
            let format_word = bytes.read_u32::<BigEndian>()?;
            let format = PacketInFormat::of_int(format_word).ok_or_else(|| {
                OfpSerializationError::UnexpectedValueError {
                    value: format!("{}", format_word),
                    field: "format".to_string(),
                    message: "set packet-in format".to_string(),
                }
            })?;
            NxMessage::SetPacketInFormat(format)
        }
        NXT_PACKET_IN => NxMessage::PacketIn(parse_nx_packet_in(&mut bytes)?),
        NXT_FLOW_AGE => NxMessage::FlowAge,
        NXT_SET_ASYNC_CONFIG => {
            let mut masks = [[0u32; 2]; 3];
            for pair in masks.iter_mut() {
                pair[0] = bytes.read_u32::<BigEndian>()?;
                pair[1] = bytes.read_u32::<BigEndian>()?;
            }
            NxMessage::SetAsyncConfig(AsyncConfig {
                packet_in_mask: masks[0],
                port_status_mask: masks[1],
                flow_removed_mask: masks[2],
            })
        }
        NXT_SET_CONTROLLER_ID => {
            let id = bytes.read_u16::<BigEndian>()?;
            bytes.consume(6);
            NxMessage::SetControllerId(id)
        }
        t => {
            return Err(OfpSerializationError::UnexpectedValueError {
                value: format!("{}", t),
                field: "subtype".to_string(),
                message: "vendor message".to_string(),
            });
        }
    };
    Ok(msg)
}

/// Marshal a vendor message body (starting at the vendor id).
pub fn marshal(nx: NxMessage, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
    bytes.write_u32::<BigEndian>(NX_VENDOR_ID).unwrap();
    match nx {
        NxMessage::TunIdFromCookie(set) => {
            bytes.write_u32::<BigEndian>(NXT_TUN_ID_FROM_COOKIE).unwrap();
            bytes.write_u8(set as u8).unwrap();
            write_padding_bytes(bytes, 7);
        }
        NxMessage::RoleRequest(role) => {
            bytes.write_u32::<BigEndian>(NXT_ROLE_REQUEST).unwrap();
            bytes.write_u32::<BigEndian>(role as u32).unwrap();
        }
        NxMessage::RoleReply(role) => {
            bytes.write_u32::<BigEndian>(NXT_ROLE_REPLY).unwrap();
            bytes.write_u32::<BigEndian>(role as u32).unwrap();
        }
        NxMessage::SetFlowFormat(format) => {
            bytes.write_u32::<BigEndian>(NXT_SET_FLOW_FORMAT).unwrap();
            bytes.write_u32::<BigEndian>(format as u32).unwrap();
        }
        NxMessage::FlowMod(fm) => {
            bytes.write_u32::<BigEndian>(NXT_FLOW_MOD).unwrap();
            marshal_nx_flow_mod(fm, bytes)?;
        }
        NxMessage::FlowRemoved(fr) => {
            bytes.write_u32::<BigEndian>(NXT_FLOW_REMOVED).unwrap();
            marshal_nx_flow_removed(fr, bytes)?;
        }
        NxMessage::FlowModTableId(set) => {
            bytes.write_u32::<BigEndian>(NXT_FLOW_MOD_TABLE_ID).unwrap();
            bytes.write_u8(set as u8).unwrap();
            write_padding_bytes(bytes, 7);
        }
        NxMessage::SetPacketInFormat(format) => {
            bytes.write_u32::<BigEndian>(NXT_SET_PACKET_IN_FORMAT).unwrap();
            bytes.write_u32::<BigEndian>(format as u32).unwrap();
        }
        NxMessage::PacketIn(pi) => {
            bytes.write_u32::<BigEndian>(NXT_PACKET_IN).unwrap();
            marshal_nx_packet_in(pi, bytes)?;
        }
        NxMessage::SetControllerId(id) => {
            bytes.write_u32::<BigEndian>(NXT_SET_CONTROLLER_ID).unwrap();
            bytes.write_u16::<BigEndian>(id).unwrap();
            write_padding_bytes(bytes, 6);
        }
        NxMessage::SetAsyncConfig(ac) => {
            bytes.write_u32::<BigEndian>(NXT_SET_ASYNC_CONFIG).unwrap();
            for pair in &[ac.packet_in_mask, ac.port_status_mask, ac.flow_removed_mask] {
                bytes.write_u32::<BigEndian>(pair[0]).unwrap();
                bytes.write_u32::<BigEndian>(pair[1]).unwrap();
            }
        }
        NxMessage::FlowAge => {
            bytes.write_u32::<BigEndian>(NXT_FLOW_AGE).unwrap();
        }
    }
    Ok(())
}

fn parse_nx_flow_mod(bytes: &mut Cursor<Vec<u8>>) -> Result<FlowMod, OfpSerializationError> {
    let cookie = bytes.read_u64::<BigEndian>()?;
    let command_word = bytes.read_u16::<BigEndian>()?;
    // The table id rides in the upper byte when the table-id extension is on.
    let table = TableId((command_word >> 8) as u8);
    let command = FlowModCmd::of_int(command_word & 0xff).ok_or_else(|| {
        OfpSerializationError::UnexpectedValueError {
            value: format!("{}", command_word & 0xff),
            field: "command".to_string(),
            message: "nx flow mod".to_string(),
        }
    })?;
    let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
    let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
    let priority = bytes.read_u16::<BigEndian>()?;
    let buffer_id = bytes.read_i32::<BigEndian>()?;
    let out_port = PseudoPort0x01::of_int(bytes.read_u16::<BigEndian>()?)?;
    let flags = bytes.read_u16::<BigEndian>()?;
    let match_len = bytes.read_u16::<BigEndian>()? as usize;
    bytes.consume(6);
    let padded = nx_match::padded_match_len(match_len);
    if bytes.remaining() < padded {
        return Err(OfpSerializationError::BadLength {
            message: "nx flow mod match".to_string(),
        });
    }
    let mut match_buf = vec![0; padded];
    bytes.read_exact(&mut match_buf)?;
    let nx = nx_match::parse(&match_buf, match_len, ParseMode::Strict, true)?;
    let actions = Action0x01::parse_sequence(bytes)?;
    Ok(FlowMod {
        table,
        command,
        pattern: nx.pattern,
        priority,
        actions,
        write_start: None,
        cookie: nx.cookie | cookie,
        cookie_mask: nx.cookie_mask,
        idle_timeout: idle,
        hard_timeout: hard,
        notify_when_removed: flags & 1 != 0,
        apply_to_packet: match buffer_id {
            -1 => None,
            n => Some(n as u32),
        },
        out_port,
        check_overlap: flags & 2 != 0,
        emergency: flags & 4 != 0,
    })
}

fn marshal_nx_flow_mod(fm: FlowMod, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
    let mut match_bytes = Vec::new();
    let cookie_entry = if fm.cookie_mask != 0 {
        Some((fm.cookie, fm.cookie_mask))
    } else {
        None
    };
    let match_len = nx_match::put_match(&mut match_bytes, &fm.pattern, cookie_entry, MatchEncoding::Nxm);
    bytes
        .write_u64::<BigEndian>(if fm.cookie_mask != 0 { 0 } else { fm.cookie })
        .unwrap();
    bytes
        .write_u16::<BigEndian>(((fm.table.0 as u16) << 8) | fm.command as u16)
        .unwrap();
    bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout)).unwrap();
    bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout)).unwrap();
    bytes.write_u16::<BigEndian>(fm.priority).unwrap();
    bytes
        .write_i32::<BigEndian>(match fm.apply_to_packet {
            None => -1,
            Some(id) => id as i32,
        })
        .unwrap();
    match fm.out_port {
        None => bytes.write_u16::<BigEndian>(0xffff).unwrap(),
        Some(pp) => PseudoPort0x01::marshal(pp, bytes),
    }
    let flags = (fm.notify_when_removed as u16)
        | ((fm.check_overlap as u16) << 1)
        | ((fm.emergency as u16) << 2);
    bytes.write_u16::<BigEndian>(flags).unwrap();
    bytes.write_u16::<BigEndian>(match_len as u16).unwrap();
    write_padding_bytes(bytes, 6);
    bytes.extend_from_slice(&match_bytes);
    Action0x01::marshal_sequence(fm.actions, bytes)
}

fn parse_nx_flow_removed(
    bytes: &mut Cursor<Vec<u8>>,
) -> Result<FlowRemoved, OfpSerializationError> {
    let cookie = bytes.read_u64::<BigEndian>()?;
    let priority = bytes.read_u16::<BigEndian>()?;
    let reason_byte = bytes.read_u8()?;
    let reason = FlowRemovedReason::of_int(reason_byte).ok_or_else(|| {
        OfpSerializationError::UnexpectedValueError {
            value: format!("{}", reason_byte),
            field: "reason".to_string(),
            message: "nx flow removed".to_string(),
        }
    })?;
    bytes.consume(1);
    let duration_sec = bytes.read_u32::<BigEndian>()?;
    let duration_nsec = bytes.read_u32::<BigEndian>()?;
    let idle_timeout = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
    let match_len = bytes.read_u16::<BigEndian>()? as usize;
    let packet_count = bytes.read_u64::<BigEndian>()?;
    let byte_count = bytes.read_u64::<BigEndian>()?;
    let padded = nx_match::padded_match_len(match_len);
    if bytes.remaining() < padded {
        return Err(OfpSerializationError::BadLength {
            message: "nx flow removed match".to_string(),
        });
    }
    let mut match_buf = vec![0; padded];
    bytes.read_exact(&mut match_buf)?;
    let nx = nx_match::parse(&match_buf, match_len, ParseMode::Strict, false)?;
    Ok(FlowRemoved {
        pattern: nx.pattern,
        cookie,
        priority,
        reason,
        duration_sec,
        duration_nsec,
        idle_timeout,
        packet_count,
        byte_count,
    })
}

fn marshal_nx_flow_removed(
    fr: FlowRemoved,
    bytes: &mut Vec<u8>,
) -> Result<(), OfpSerializationError> {
    let mut match_bytes = Vec::new();
    let match_len = nx_match::put_match(&mut match_bytes, &fr.pattern, None, MatchEncoding::Nxm);
    bytes.write_u64::<BigEndian>(fr.cookie).unwrap();
    bytes.write_u16::<BigEndian>(fr.priority).unwrap();
    bytes.write_u8(fr.reason as u8).unwrap();
    write_padding_bytes(bytes, 1);
    bytes.write_u32::<BigEndian>(fr.duration_sec).unwrap();
    bytes.write_u32::<BigEndian>(fr.duration_nsec).unwrap();
    bytes
        .write_u16::<BigEndian>(Timeout::to_int(fr.idle_timeout))
        .unwrap();
    bytes.write_u16::<BigEndian>(match_len as u16).unwrap();
    bytes.write_u64::<BigEndian>(fr.packet_count).unwrap();
    bytes.write_u64::<BigEndian>(fr.byte_count).unwrap();
    bytes.extend_from_slice(&match_bytes);
    Ok(())
}

fn parse_nx_packet_in(bytes: &mut Cursor<Vec<u8>>) -> Result<PacketIn, OfpSerializationError> {
    let buffer_id = bytes.read_i32::<BigEndian>()?;
    let total_len = bytes.read_u16::<BigEndian>()?;
    let reason_byte = bytes.read_u8()?;
    let reason = PacketInReason::of_int(reason_byte).ok_or_else(|| {
        OfpSerializationError::UnexpectedValueError {
            value: format!("{}", reason_byte),
            field: "reason".to_string(),
            message: "nx packet in".to_string(),
        }
    })?;
    let _table_id = bytes.read_u8()?;
    let _cookie = bytes.read_u64::<BigEndian>()?;
    let match_len = bytes.read_u16::<BigEndian>()? as usize;
    bytes.consume(6);
    let padded = nx_match::padded_match_len(match_len);
    if bytes.remaining() < padded {
        return Err(OfpSerializationError::BadLength {
            message: "nx packet in match".to_string(),
        });
    }
    let mut match_buf = vec![0; padded];
    bytes.read_exact(&mut match_buf)?;
    let nx = nx_match::parse(&match_buf, match_len, ParseMode::Strict, false)?;
    bytes.consume(2);
    let payload_bytes = bytes.fill_buf()?.to_vec();
    let payload = match buffer_id {
        -1 => Payload::NotBuffered(payload_bytes),
        n => Payload::Buffered(n as u32, payload_bytes),
    };
    Ok(PacketIn {
        input_payload: payload,
        total_len,
        port: nx.pattern.in_port.unwrap_or(0),
        reason,
    })
}

fn marshal_nx_packet_in(pi: PacketIn, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
    let mut pattern = Pattern::match_all();
    pattern.in_port = Some(pi.port);
    let mut match_bytes = Vec::new();
    let match_len = nx_match::put_match(&mut match_bytes, &pattern, None, MatchEncoding::Nxm);
    bytes
        .write_i32::<BigEndian>(match pi.input_payload {
            Payload::Buffered(n, _) => n as i32,
            Payload::NotBuffered(_) => -1,
        })
        .unwrap();
    bytes.write_u16::<BigEndian>(pi.total_len).unwrap();
    bytes.write_u8(pi.reason as u8).unwrap();
    bytes.write_u8(0).unwrap(); // table id
    bytes.write_u64::<BigEndian>(0).unwrap(); // cookie
    bytes.write_u16::<BigEndian>(match_len as u16).unwrap();
    write_padding_bytes(bytes, 6);
    bytes.extend_from_slice(&match_bytes);
    write_padding_bytes(bytes, 2);
    match pi.input_payload {
        Payload::Buffered(_, data) | Payload::NotBuffered(data) => {
            bytes.extend_from_slice(&data)
        }
    }
    Ok(())
}

/// A dissected vendor stats request.
#[derive(Debug, PartialEq, Clone)]
pub enum NxStatsRequest {
    Flow {
        pattern: Pattern,
        out_port: u16,
        table_id: u8,
    },
    Aggregate {
        pattern: Pattern,
        out_port: u16,
        table_id: u8,
    },
}

/// Parse the body of a `StatsReqBody::VendorBody` carrying an NXST request.
pub fn parse_nx_stats_request(body: &[u8]) -> Result<NxStatsRequest, OfpSerializationError> {
    let mut bytes = Cursor::new(body.to_vec());
    let subtype = bytes.read_u32::<BigEndian>()?;
    bytes.consume(4);
    match subtype {
        NXST_FLOW | NXST_AGGREGATE => {
            let out_port = bytes.read_u16::<BigEndian>()?;
            let match_len = bytes.read_u16::<BigEndian>()? as usize;
            let table_id = bytes.read_u8()?;
            bytes.consume(3);
            let padded = nx_match::padded_match_len(match_len);
            if bytes.remaining() < padded {
                return Err(OfpSerializationError::BadLength {
                    message: "nx stats request match".to_string(),
                });
            }
            let mut match_buf = vec![0; padded];
            bytes.read_exact(&mut match_buf)?;
            let nx = nx_match::parse(&match_buf, match_len, ParseMode::Strict, false)?;
            if subtype == NXST_FLOW {
                Ok(NxStatsRequest::Flow {
                    pattern: nx.pattern,
                    out_port,
                    table_id,
                })
            } else {
                Ok(NxStatsRequest::Aggregate {
                    pattern: nx.pattern,
                    out_port,
                    table_id,
                })
            }
        }
        t => Err(OfpSerializationError::UnexpectedValueError {
            value: format!("{}", t),
            field: "subtype".to_string(),
            message: "vendor stats request".to_string(),
        }),
    }
}

/// Build the vendor body of an NXST request (used by tests and admin tools).
pub fn marshal_nx_stats_request(req: &NxStatsRequest) -> Vec<u8> {
    let (subtype, pattern, out_port, table_id) = match req {
        NxStatsRequest::Flow {
            pattern,
            out_port,
            table_id,
        } => (NXST_FLOW, pattern, *out_port, *table_id),
        NxStatsRequest::Aggregate {
            pattern,
            out_port,
            table_id,
        } => (NXST_AGGREGATE, pattern, *out_port, *table_id),
    };
    let mut match_bytes = Vec::new();
    let match_len = nx_match::put_match(&mut match_bytes, pattern, None, MatchEncoding::Nxm);
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(subtype).unwrap();
    write_padding_bytes(&mut body, 4);
    body.write_u16::<BigEndian>(out_port).unwrap();
    body.write_u16::<BigEndian>(match_len as u16).unwrap();
    body.write_u8(table_id).unwrap();
    write_padding_bytes(&mut body, 3);
    body.extend_from_slice(&match_bytes);
    body
}

/// Append one NXST_FLOW reply entry to `body`. Returns the entry length.
pub fn put_nx_flow_stats(body: &mut Vec<u8>, stats: &FlowStats) -> Result<usize, OfpSerializationError> {
    let mut match_bytes = Vec::new();
    let match_len = nx_match::put_match(&mut match_bytes, &stats.pattern, None, MatchEncoding::Nxm);
    let entry_len = 48 + match_bytes.len() + Action0x01::size_of_sequence(&stats.actions);
    body.write_u16::<BigEndian>(entry_len as u16).unwrap();
    body.write_u8(stats.table_id).unwrap();
    write_padding_bytes(body, 1);
    body.write_u32::<BigEndian>(stats.duration_sec).unwrap();
    body.write_u32::<BigEndian>(stats.duration_nsec).unwrap();
    body.write_u16::<BigEndian>(stats.priority).unwrap();
    body.write_u16::<BigEndian>(stats.idle_timeout).unwrap();
    body.write_u16::<BigEndian>(stats.hard_timeout).unwrap();
    body.write_u16::<BigEndian>(match_len as u16).unwrap();
    write_padding_bytes(body, 4);
    body.write_u64::<BigEndian>(stats.cookie).unwrap();
    body.write_u64::<BigEndian>(stats.packet_count).unwrap();
    body.write_u64::<BigEndian>(stats.byte_count).unwrap();
    body.extend_from_slice(&match_bytes);
    Action0x01::marshal_sequence(stats.actions.clone(), body)?;
    Ok(entry_len)
}

/// The NXST reply body prefix: subtype plus alignment padding.
pub fn nx_stats_reply_prefix(subtype: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(subtype).unwrap();
    write_padding_bytes(&mut body, 4);
    body
}

/// Parse the entries of an NXST_FLOW reply body (after the subtype prefix).
pub fn parse_nx_flow_stats(body: &[u8]) -> Result<Vec<FlowStats>, OfpSerializationError> {
    let mut bytes = Cursor::new(body.to_vec());
    let subtype = bytes.read_u32::<BigEndian>()?;
    if subtype != NXST_FLOW {
        return Err(OfpSerializationError::UnexpectedValueError {
            value: format!("{}", subtype),
            field: "subtype".to_string(),
            message: "vendor stats reply".to_string(),
        });
    }
    bytes.consume(4);
    let mut out = Vec::new();
    while bytes.remaining() > 0 {
        let entry_len = bytes.read_u16::<BigEndian>()? as usize;
        if entry_len < 48 || bytes.remaining() + 2 < entry_len {
            return Err(OfpSerializationError::BadLength {
                message: "nx flow stats entry".to_string(),
            });
        }
        let table_id = bytes.read_u8()?;
        bytes.consume(1);
        let duration_sec = bytes.read_u32::<BigEndian>()?;
        let duration_nsec = bytes.read_u32::<BigEndian>()?;
        let priority = bytes.read_u16::<BigEndian>()?;
        let idle_timeout = bytes.read_u16::<BigEndian>()?;
        let hard_timeout = bytes.read_u16::<BigEndian>()?;
        let match_len = bytes.read_u16::<BigEndian>()? as usize;
        bytes.consume(4);
        let cookie = bytes.read_u64::<BigEndian>()?;
        let packet_count = bytes.read_u64::<BigEndian>()?;
        let byte_count = bytes.read_u64::<BigEndian>()?;
        let padded = nx_match::padded_match_len(match_len);
        let mut match_buf = vec![0; padded];
        bytes.read_exact(&mut match_buf)?;
        let nx = nx_match::parse(&match_buf, match_len, ParseMode::Strict, false)?;
        let actions_len = entry_len - 48 - padded;
        let mut actions_buf = vec![0; actions_len];
        bytes.read_exact(&mut actions_buf)?;
        let mut actions_cursor = Cursor::new(actions_buf);
        let actions = Action0x01::parse_sequence(&mut actions_cursor)?;
        out.push(FlowStats {
            table_id,
            pattern: nx.pattern,
            duration_sec,
            duration_nsec,
            priority,
            idle_timeout,
            hard_timeout,
            cookie,
            packet_count,
            byte_count,
            actions,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action_roundtrip(action: Action) -> Action {
        let mut bytes = Vec::new();
        marshal_nx_action(action, &mut bytes).unwrap();
        assert_eq!(bytes.len() % 8, 0, "vendor actions must be 8-byte aligned");
        let mut cursor = Cursor::new(bytes.clone());
        let code = cursor.read_u16::<BigEndian>().unwrap();
        assert_eq!(code, 0xffff);
        let len = cursor.read_u16::<BigEndian>().unwrap() as usize;
        assert_eq!(len, bytes.len());
        parse_nx_action(&mut cursor, len - 4).unwrap()
    }

    #[test]
    fn vendor_actions_roundtrip() {
        let cases = vec![
            Action::SetTunnel(0x1234),
            Action::SetTunnel(0x1_0000_0000),
            Action::SetQueue(9),
            Action::PopQueue,
            Action::RegMove {
                src: 0x10004,
                dst: 0x10204,
                n_bits: 16,
                src_ofs: 0,
                dst_ofs: 16,
            },
            Action::RegLoad {
                dst: 0x10004,
                ofs: 4,
                nbits: 12,
                value: 0xabc,
            },
            Action::Note(vec![0xde, 0xad, 0xbe, 0xef]),
            Action::Multipath {
                fields: 3,
                basis: 50,
                algorithm: 1,
                max_link: 16,
                arg: 0,
                ofs: 0,
                nbits: 8,
                dst: 0x10004,
            },
            Action::Autopath {
                id: 7,
                ofs: 0,
                nbits: 16,
                dst: 0x10004,
            },
            Action::Bundle {
                algorithm: 0,
                fields: 1,
                basis: 0,
                slave_type: 0,
                ofs: 0,
                nbits: 16,
                dst: 0x10004,
                slaves: vec![1, 2, 3],
            },
            Action::OutputReg {
                src: 0x10004,
                ofs: 0,
                nbits: 16,
                max_len: 128,
            },
            Action::Learn {
                idle_timeout: 60,
                hard_timeout: 0,
                priority: 100,
                cookie: 0xfeed,
                flags: 1,
                table_id: 0,
                spec: vec![0, 0, 0, 0],
            },
            Action::Exit,
            Action::DecTtl,
            Action::FinTimeout { idle: 10, hard: 20 },
            Action::Controller {
                max_len: 128,
                controller_id: 3,
                reason: PacketInReason::ExplicitSend,
            },
            Action::PushMpls(0x8847),
            Action::PopMpls(0x0800),
            Action::SetMplsLabel(42),
            Action::SetMplsTc(5),
            Action::SetMplsTtl(64),
            Action::DecMplsTtl,
            Action::PushVlan(0x8100),
        ];
        for action in cases {
            assert_eq!(action_roundtrip(action.clone()), action);
        }
    }

    #[test]
    fn unknown_vendor_subtype_is_rejected() {
        let mut bytes = Vec::new();
        put_nx_action_header(&mut bytes, 16, 0x7fff);
        write_padding_bytes(&mut bytes, 6);
        let mut cursor = Cursor::new(bytes);
        cursor.consume(4);
        let err = parse_nx_action(&mut cursor, 12).unwrap_err();
        assert!(matches!(
            err,
            OfpSerializationError::BadActionEntry {
                kind: ActionEntryError::BadVendorType,
                ..
            }
        ));
    }

    #[test]
    fn unknown_vendor_id_is_rejected() {
        let mut bytes = Vec::new();
        bytes.write_u32::<BigEndian>(0xdeadbeef).unwrap();
        bytes.write_u16::<BigEndian>(0).unwrap();
        bytes.write_u16::<BigEndian>(0).unwrap();
        let mut cursor = Cursor::new(bytes);
        let err = parse_nx_action(&mut cursor, 8).unwrap_err();
        assert!(matches!(
            err,
            OfpSerializationError::BadActionEntry {
                kind: ActionEntryError::BadVendor,
                ..
            }
        ));
    }

    fn message_roundtrip(msg: NxMessage) -> NxMessage {
        let mut bytes = Vec::new();
        marshal(msg, &mut bytes).unwrap();
        parse(&bytes).unwrap()
    }

    #[test]
    fn vendor_messages_roundtrip() {
        let mut pattern = Pattern::match_all();
        pattern.dl_typ = Some(0x0800);
        pattern.nw_src = Some(Mask::masked(0x0a000000, 8));
        pattern.tun_id = Some(Mask::exact(99));
        let cases = vec![
            NxMessage::TunIdFromCookie(true),
            NxMessage::RoleRequest(ControllerRole::Slave),
            NxMessage::RoleReply(ControllerRole::Master),
            NxMessage::SetFlowFormat(FlowFormat::Nxm),
            NxMessage::FlowModTableId(true),
            NxMessage::SetPacketInFormat(PacketInFormat::Nxm),
            NxMessage::SetControllerId(7),
            NxMessage::SetAsyncConfig(AsyncConfig::default()),
            NxMessage::FlowAge,
            NxMessage::FlowMod(FlowMod {
                table: TableId(2),
                command: FlowModCmd::AddFlow,
                pattern: pattern.clone(),
                priority: 4000,
                actions: vec![Action::SetTunnel(1), Action::Output(PseudoPort::Normal)],
                write_start: None,
                cookie: 0,
                cookie_mask: 0,
                idle_timeout: Timeout::ExpiresAfter(5),
                hard_timeout: Timeout::Permanent,
                notify_when_removed: true,
                apply_to_packet: None,
                out_port: None,
                check_overlap: false,
                emergency: false,
            }),
            NxMessage::FlowRemoved(FlowRemoved {
                pattern,
                cookie: 0x77,
                priority: 10,
                reason: FlowRemovedReason::HardTimeout,
                duration_sec: 3,
                duration_nsec: 500,
                idle_timeout: Timeout::Permanent,
                packet_count: 2,
                byte_count: 128,
            }),
            NxMessage::PacketIn(PacketIn {
                input_payload: Payload::NotBuffered(vec![1, 2, 3]),
                total_len: 3,
                port: 5,
                reason: PacketInReason::NoMatch,
            }),
        ];
        for msg in cases {
            assert_eq!(message_roundtrip(msg.clone()), msg);
        }
    }

    #[test]
    fn nx_flow_mod_cookie_mask_roundtrip() {
        let fm = FlowMod {
            table: TableId(0),
            command: FlowModCmd::DeleteFlow,
            pattern: Pattern::match_all(),
            priority: 0,
            actions: vec![],
            write_start: None,
            cookie: 0xdeadbeef,
            cookie_mask: 0xffffffff,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            apply_to_packet: None,
            out_port: None,
            check_overlap: false,
            emergency: false,
        };
        let out = message_roundtrip(NxMessage::FlowMod(fm.clone()));
        assert_eq!(out, NxMessage::FlowMod(fm));
    }

    #[test]
    fn nx_stats_request_roundtrip() {
        let mut pattern = Pattern::match_all();
        pattern.in_port = Some(3);
        let req = NxStatsRequest::Flow {
            pattern,
            out_port: 0xffff,
            table_id: 0xff,
        };
        let body = marshal_nx_stats_request(&req);
        assert_eq!(parse_nx_stats_request(&body).unwrap(), req);
    }

    #[test]
    fn nx_flow_stats_roundtrip() {
        let mut pattern = Pattern::match_all();
        pattern.dl_typ = Some(0x0800);
        pattern.nw_dst = Some(Mask::masked(0x0a000000, 16));
        let stats = FlowStats {
            table_id: 0,
            pattern,
            duration_sec: 1,
            duration_nsec: 2,
            priority: 3,
            idle_timeout: 4,
            hard_timeout: 5,
            cookie: 6,
            packet_count: 7,
            byte_count: 8,
            actions: vec![Action::Output(PseudoPort::PhysicalPort(4))],
        };
        let mut body = nx_stats_reply_prefix(NXST_FLOW);
        put_nx_flow_stats(&mut body, &stats).unwrap();
        let parsed = parse_nx_flow_stats(&body).unwrap();
        assert_eq!(parsed, vec![stats]);
    }
}
