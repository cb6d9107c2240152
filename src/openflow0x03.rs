//! OpenFlow 1.2 wire dialect.
//!
//! Same subset as the 1.1 module, with the TLV (OXM) match form and the
//! SET_FIELD action carrying an OXM entry in place of the per-field set
//! actions. The OXM entries themselves are handled by `nx_match`.

use std::io::{BufRead, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Buf;

use crate::bits::*;
use crate::message::*;
use crate::nx_match::{self, MatchEncoding, ParseMode};
use crate::ofp_header::{OfpHeader, OPENFLOW_0_03_VERSION};
use crate::ofp_message::{ActionEntryError, OfpMessage, OfpSerializationError};
use crate::openflow::MsgCode;
use crate::openflow0x02::{Instruction0x02, PortDesc0x02, PseudoPort0x02, OfpPort};
use crate::ofp_utils::write_padding_bytes;
use crate::packet::{bytes_of_mac, mac_of_bytes};

const OFPMT_OXM: u16 = 1;

const OFPAT_OUTPUT: u16 = 0;
const OFPAT_SET_MPLS_TTL: u16 = 15;
const OFPAT_DEC_MPLS_TTL: u16 = 16;
const OFPAT_PUSH_VLAN: u16 = 17;
const OFPAT_POP_VLAN: u16 = 18;
const OFPAT_PUSH_MPLS: u16 = 19;
const OFPAT_POP_MPLS: u16 = 20;
const OFPAT_SET_QUEUE: u16 = 21;
const OFPAT_DEC_NW_TTL: u16 = 24;
const OFPAT_SET_FIELD: u16 = 25;

// OXM basic-class headers used by SET_FIELD.
const OXM_CLASS_BASIC: u16 = 0x8000;
const OXM_VLAN_VID: u8 = 6;
const OXM_VLAN_PCP: u8 = 7;
const OXM_ETH_DST: u8 = 3;
const OXM_ETH_SRC: u8 = 4;
const OXM_IP_DSCP: u8 = 8;
const OXM_IPV4_SRC: u8 = 11;
const OXM_IPV4_DST: u8 = 12;
const OXM_TCP_SRC: u8 = 13;
const OXM_TCP_DST: u8 = 14;
const OXM_UDP_SRC: u8 = 15;
const OXM_UDP_DST: u8 = 16;
const OXM_MPLS_LABEL: u8 = 34;
const OXM_MPLS_TC: u8 = 35;

const VLAN_CFI: u16 = 0x1000;

fn oxm_header(field: u8, length: u8) -> u32 {
    ((OXM_CLASS_BASIC as u32) << 16) | ((field as u32) << 9) | (length as u32)
}

/// Parse and marshal the 1.2 match structure: a 4-byte `(type, length)`
/// header, OXM entries, and padding to 8-byte alignment of the whole.
pub struct Pattern0x03;

impl Pattern0x03 {
    pub fn size_of(p: &Pattern) -> usize {
        let mut scratch = Vec::new();
        let match_len = nx_match::put_match(&mut scratch, p, None, MatchEncoding::Oxm);
        let total = 4 + match_len;
        (total + 7) / 8 * 8
    }

    pub fn parse(bytes: &mut Cursor<Vec<u8>>) -> Result<Pattern, OfpSerializationError> {
        let typ = bytes.read_u16::<BigEndian>()?;
        let length = bytes.read_u16::<BigEndian>()? as usize;
        if typ != OFPMT_OXM || length < 4 {
            return Err(OfpSerializationError::UnexpectedValueError {
                value: format!("type {} length {}", typ, length),
                field: "match header".to_string(),
                message: "oxm match".to_string(),
            });
        }
        let match_len = length - 4;
        let padded = (length + 7) / 8 * 8 - 4;
        if bytes.remaining() < padded {
            return Err(OfpSerializationError::BadLength {
                message: "oxm match".to_string(),
            });
        }
        let mut buf = vec![0; padded];
        bytes.read_exact(&mut buf)?;
        let nx = nx_match::parse(&buf, match_len, ParseMode::Strict, false)?;
        Ok(nx.pattern)
    }

    pub fn marshal(p: Pattern, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        let mut entries = Vec::new();
        let match_len = nx_match::put_match(&mut entries, &p, None, MatchEncoding::Oxm);
        bytes.write_u16::<BigEndian>(OFPMT_OXM).unwrap();
        bytes.write_u16::<BigEndian>((4 + match_len) as u16).unwrap();
        // Entry padding was computed for the entries alone; redo it for the
        // 4-byte header plus entries.
        entries.truncate(match_len);
        bytes.extend_from_slice(&entries);
        let total = 4 + match_len;
        write_padding_bytes(bytes, (total + 7) / 8 * 8 - total);
        Ok(())
    }
}

pub struct Action0x03;

impl Action0x03 {
    fn set_field_payload(a: &Action) -> Option<(u8, Vec<u8>)> {
        let payload = match *a {
            Action::SetDlVlan(Some(vid)) => (OXM_VLAN_VID, (VLAN_CFI | vid).to_be_bytes().to_vec()),
            Action::SetDlVlanPcp(pcp) => (OXM_VLAN_PCP, vec![pcp]),
            Action::SetDlSrc(mac) => (OXM_ETH_SRC, bytes_of_mac(mac).to_vec()),
            Action::SetDlDst(mac) => (OXM_ETH_DST, bytes_of_mac(mac).to_vec()),
            Action::SetNwSrc(ip) => (OXM_IPV4_SRC, ip.to_be_bytes().to_vec()),
            Action::SetNwDst(ip) => (OXM_IPV4_DST, ip.to_be_bytes().to_vec()),
            Action::SetNwTos(tos) => (OXM_IP_DSCP, vec![tos >> 2]),
            Action::SetTpSrc(pt) => (OXM_TCP_SRC, pt.to_be_bytes().to_vec()),
            Action::SetTpDst(pt) => (OXM_TCP_DST, pt.to_be_bytes().to_vec()),
            Action::SetMplsLabel(label) => (OXM_MPLS_LABEL, label.to_be_bytes().to_vec()),
            Action::SetMplsTc(tc) => (OXM_MPLS_TC, vec![tc]),
            _ => return None,
        };
        Some(payload)
    }

    pub fn size_of(a: &Action) -> usize {
        if let Some((_, payload)) = Self::set_field_payload(a) {
            let unpadded = 4 + 4 + payload.len();
            return (unpadded + 7) / 8 * 8;
        }
        match *a {
            Action::Output(_) => 16,
            _ => 8,
        }
    }

    pub fn size_of_sequence(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| !Instruction0x02::is_instruction_action(a))
            .fold(0, |acc, x| Action0x03::size_of(x) + acc)
    }

    fn parse_one(bytes: &mut Cursor<Vec<u8>>) -> Result<Action, OfpSerializationError> {
        if bytes.remaining() < 4 {
            return Err(OfpSerializationError::BadActionEntry {
                kind: ActionEntryError::BadLength,
                detail: "truncated action header".to_string(),
            });
        }
        let code = bytes.read_u16::<BigEndian>()?;
        let length = bytes.read_u16::<BigEndian>()? as usize;
        if length < 8 || length % 8 != 0 || bytes.remaining() < length - 4 {
            return Err(OfpSerializationError::BadActionEntry {
                kind: ActionEntryError::BadLength,
                detail: format!("action length {}", length),
            });
        }
        let action = match code {
            OFPAT_OUTPUT => {
                let port = bytes.read_u32::<BigEndian>()?;
                let max_len = bytes.read_u16::<BigEndian>()?;
                bytes.consume(6);
                Action::Output(PseudoPort0x02::make(port, max_len as u64)?)
            }
            OFPAT_SET_MPLS_TTL => {
                let ttl = bytes.read_u8()?;
                bytes.consume(3);
                Action::SetMplsTtl(ttl)
            }
            OFPAT_DEC_MPLS_TTL => {
                bytes.consume(4);
                Action::DecMplsTtl
            }
            OFPAT_PUSH_VLAN => {
                let ethertype = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                Action::PushVlan(ethertype)
            }
            OFPAT_POP_VLAN => {
                bytes.consume(4);
                Action::SetDlVlan(None)
            }
            OFPAT_PUSH_MPLS => {
                let ethertype = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                Action::PushMpls(ethertype)
            }
            OFPAT_POP_MPLS => {
                let ethertype = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                Action::PopMpls(ethertype)
            }
            OFPAT_SET_QUEUE => Action::SetQueue(bytes.read_u32::<BigEndian>()?),
            OFPAT_DEC_NW_TTL => {
                bytes.consume(4);
                Action::DecTtl
            }
            OFPAT_SET_FIELD => Self::parse_set_field(bytes, length - 4)?,
            t => {
                return Err(OfpSerializationError::BadActionEntry {
                    kind: ActionEntryError::BadType,
                    detail: format!("0x{:x}", t),
                });
            }
        };
        Ok(action)
    }

    fn parse_set_field(
        bytes: &mut Cursor<Vec<u8>>,
        body_len: usize,
    ) -> Result<Action, OfpSerializationError> {
        let header = bytes.read_u32::<BigEndian>()?;
        let class = (header >> 16) as u16;
        let field = ((header >> 9) & 0x7f) as u8;
        let payload_len = (header & 0xff) as usize;
        if class != OXM_CLASS_BASIC || header & 0x100 != 0 {
            return Err(OfpSerializationError::BadActionEntry {
                kind: ActionEntryError::BadArgument,
                detail: format!("set-field oxm 0x{:08x}", header),
            });
        }
        if payload_len + 4 > body_len {
            return Err(OfpSerializationError::BadActionEntry {
                kind: ActionEntryError::BadLength,
                detail: "set-field payload".to_string(),
            });
        }
        let mut payload = vec![0; payload_len];
        bytes.read_exact(&mut payload)?;
        bytes.consume(body_len - 4 - payload_len);
        let read_u16 = |p: &[u8]| ((p[0] as u16) << 8) | p[1] as u16;
        let read_u32 = |p: &[u8]| {
            ((p[0] as u32) << 24) | ((p[1] as u32) << 16) | ((p[2] as u32) << 8) | p[3] as u32
        };
        let action = match field {
            OXM_VLAN_VID => Action::SetDlVlan(Some(read_u16(&payload) & 0x0fff)),
            OXM_VLAN_PCP => Action::SetDlVlanPcp(payload[0]),
            OXM_ETH_SRC => {
                let mut mac = [0u8; 6];
                mac.copy_from_slice(&payload);
                Action::SetDlSrc(mac_of_bytes(mac))
            }
            OXM_ETH_DST => {
                let mut mac = [0u8; 6];
                mac.copy_from_slice(&payload);
                Action::SetDlDst(mac_of_bytes(mac))
            }
            OXM_IPV4_SRC => Action::SetNwSrc(read_u32(&payload)),
            OXM_IPV4_DST => Action::SetNwDst(read_u32(&payload)),
            OXM_IP_DSCP => Action::SetNwTos(payload[0] << 2),
            OXM_TCP_SRC | OXM_UDP_SRC => Action::SetTpSrc(read_u16(&payload)),
            OXM_TCP_DST | OXM_UDP_DST => Action::SetTpDst(read_u16(&payload)),
            OXM_MPLS_LABEL => Action::SetMplsLabel(read_u32(&payload)),
            OXM_MPLS_TC => Action::SetMplsTc(payload[0]),
            f => {
                return Err(OfpSerializationError::BadActionEntry {
                    kind: ActionEntryError::BadArgument,
                    detail: format!("set-field field {}", f),
                });
            }
        };
        Ok(action)
    }

    pub fn parse_sequence(bytes: &mut Cursor<Vec<u8>>) -> Result<Vec<Action>, OfpSerializationError> {
        let mut v = vec![];
        while bytes.remaining() > 0 {
            v.push(Action0x03::parse_one(bytes)?);
        }
        Ok(v)
    }

    pub fn marshal(act: Action, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        if let Some((field, payload)) = Self::set_field_payload(&act) {
            let total = Self::size_of(&act);
            bytes.write_u16::<BigEndian>(OFPAT_SET_FIELD).unwrap();
            bytes.write_u16::<BigEndian>(total as u16).unwrap();
            bytes
                .write_u32::<BigEndian>(oxm_header(field, payload.len() as u8))
                .unwrap();
            bytes.extend_from_slice(&payload);
            write_padding_bytes(bytes, total - 8 - payload.len());
            return Ok(());
        }
        let put = |bytes: &mut Vec<u8>, code: u16, len: usize| {
            bytes.write_u16::<BigEndian>(code).unwrap();
            bytes.write_u16::<BigEndian>(len as u16).unwrap();
        };
        match act {
            Action::Output(pp) => {
                put(bytes, OFPAT_OUTPUT, 16);
                PseudoPort0x02::marshal(pp, bytes);
                bytes
                    .write_u16::<BigEndian>(match pp {
                        PseudoPort::Controller(w) => w as u16,
                        _ => 0,
                    })
                    .unwrap();
                write_padding_bytes(bytes, 6);
            }
            Action::SetMplsTtl(ttl) => {
                put(bytes, OFPAT_SET_MPLS_TTL, 8);
                bytes.write_u8(ttl).unwrap();
                write_padding_bytes(bytes, 3);
            }
            Action::DecMplsTtl => {
                put(bytes, OFPAT_DEC_MPLS_TTL, 8);
                write_padding_bytes(bytes, 4);
            }
            Action::PushVlan(ethertype) => {
                put(bytes, OFPAT_PUSH_VLAN, 8);
                bytes.write_u16::<BigEndian>(ethertype).unwrap();
                write_padding_bytes(bytes, 2);
            }
            Action::SetDlVlan(None) => {
                put(bytes, OFPAT_POP_VLAN, 8);
                write_padding_bytes(bytes, 4);
            }
            Action::PushMpls(ethertype) => {
                put(bytes, OFPAT_PUSH_MPLS, 8);
                bytes.write_u16::<BigEndian>(ethertype).unwrap();
                write_padding_bytes(bytes, 2);
            }
            Action::PopMpls(ethertype) => {
                put(bytes, OFPAT_POP_MPLS, 8);
                bytes.write_u16::<BigEndian>(ethertype).unwrap();
                write_padding_bytes(bytes, 2);
            }
            Action::SetQueue(q) => {
                put(bytes, OFPAT_SET_QUEUE, 8);
                bytes.write_u32::<BigEndian>(q).unwrap();
            }
            Action::DecTtl => {
                put(bytes, OFPAT_DEC_NW_TTL, 8);
                write_padding_bytes(bytes, 4);
            }
            other => {
                return Err(OfpSerializationError::UnimplementedFeatureInVersion {
                    version: OPENFLOW_0_03_VERSION,
                    feature: format!("action {:?}", other),
                });
            }
        }
        Ok(())
    }
}

/// Instruction handling for the 1.2 dialect: identical framing to 1.1, but
/// the contained actions use the 1.2 codec.
pub struct Instruction0x03;

impl Instruction0x03 {
    const GOTO_TABLE: u16 = 1;
    const WRITE_METADATA: u16 = 2;
    const WRITE_ACTIONS: u16 = 3;
    const APPLY_ACTIONS: u16 = 4;
    const CLEAR_ACTIONS: u16 = 5;

    pub fn parse_sequence(
        bytes: &mut Cursor<Vec<u8>>,
    ) -> Result<(Vec<Action>, Option<usize>), OfpSerializationError> {
        let mut apply = Vec::new();
        let mut write: Option<Vec<Action>> = None;
        let mut tail = Vec::new();
        while bytes.remaining() > 0 {
            if bytes.remaining() < 4 {
                return Err(OfpSerializationError::BadLength {
                    message: "instruction header".to_string(),
                });
            }
            let typ = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if len < 8 || bytes.remaining() < len - 4 {
                return Err(OfpSerializationError::BadLength {
                    message: "instruction".to_string(),
                });
            }
            match typ {
                Self::GOTO_TABLE => {
                    let table = bytes.read_u8()?;
                    bytes.consume(3);
                    tail.push(Action::GotoTable(table));
                }
                Self::WRITE_METADATA => {
                    bytes.consume(4);
                    let metadata = bytes.read_u64::<BigEndian>()?;
                    let mask = bytes.read_u64::<BigEndian>()?;
                    tail.push(Action::WriteMetadata { metadata, mask });
                }
                Self::WRITE_ACTIONS | Self::APPLY_ACTIONS => {
                    bytes.consume(4);
                    let mut actions_buf = vec![0; len - 8];
                    bytes.read_exact(&mut actions_buf)?;
                    let mut cursor = Cursor::new(actions_buf);
                    let actions = Action0x03::parse_sequence(&mut cursor)?;
                    if typ == Self::APPLY_ACTIONS {
                        apply.extend(actions);
                    } else {
                        write.get_or_insert_with(Vec::new).extend(actions);
                    }
                }
                Self::CLEAR_ACTIONS => {
                    bytes.consume(4);
                    tail.push(Action::ClearActions);
                }
                t => {
                    return Err(OfpSerializationError::UnexpectedValueError {
                        value: format!("{}", t),
                        field: "type".to_string(),
                        message: "instruction".to_string(),
                    });
                }
            }
        }
        let write_start = write.as_ref().map(|_| apply.len());
        let mut actions = apply;
        if let Some(w) = write {
            actions.extend(w);
        }
        actions.extend(tail);
        Ok((actions, write_start))
    }

    pub fn marshal_sequence(
        actions: Vec<Action>,
        write_start: Option<usize>,
        bytes: &mut Vec<u8>,
    ) -> Result<(), OfpSerializationError> {
        let mut apply = Vec::new();
        let mut write = Vec::new();
        let mut clear = false;
        let mut metadata = None;
        let mut goto = None;
        for (i, act) in actions.into_iter().enumerate() {
            match act {
                Action::GotoTable(t) => goto = Some(t),
                Action::WriteMetadata { metadata: m, mask } => metadata = Some((m, mask)),
                Action::ClearActions => clear = true,
                act => {
                    if write_start.map_or(false, |ws| i >= ws) {
                        write.push(act);
                    } else {
                        apply.push(act);
                    }
                }
            }
        }
        if !apply.is_empty() || write_start.is_none() {
            let len = 8 + Action0x03::size_of_sequence(&apply);
            bytes.write_u16::<BigEndian>(Self::APPLY_ACTIONS).unwrap();
            bytes.write_u16::<BigEndian>(len as u16).unwrap();
            write_padding_bytes(bytes, 4);
            for act in apply {
                Action0x03::marshal(act, bytes)?;
            }
        }
        if write_start.is_some() {
            let len = 8 + Action0x03::size_of_sequence(&write);
            bytes.write_u16::<BigEndian>(Self::WRITE_ACTIONS).unwrap();
            bytes.write_u16::<BigEndian>(len as u16).unwrap();
            write_padding_bytes(bytes, 4);
            for act in write {
                Action0x03::marshal(act, bytes)?;
            }
        }
        if clear {
            bytes.write_u16::<BigEndian>(Self::CLEAR_ACTIONS).unwrap();
            bytes.write_u16::<BigEndian>(8).unwrap();
            write_padding_bytes(bytes, 4);
        }
        if let Some((m, mask)) = metadata {
            bytes.write_u16::<BigEndian>(Self::WRITE_METADATA).unwrap();
            bytes.write_u16::<BigEndian>(24).unwrap();
            write_padding_bytes(bytes, 4);
            bytes.write_u64::<BigEndian>(m).unwrap();
            bytes.write_u64::<BigEndian>(mask).unwrap();
        }
        if let Some(t) = goto {
            bytes.write_u16::<BigEndian>(Self::GOTO_TABLE).unwrap();
            bytes.write_u16::<BigEndian>(8).unwrap();
            bytes.write_u8(t).unwrap();
            write_padding_bytes(bytes, 3);
        }
        Ok(())
    }

    pub fn size_of_sequence(actions: &[Action], write_start: Option<usize>) -> usize {
        let mut size = 0;
        let mut apply_len = 0;
        let mut write_len = 0;
        for (i, act) in actions.iter().enumerate() {
            match act {
                Action::GotoTable(_) => size += 8,
                Action::WriteMetadata { .. } => size += 24,
                Action::ClearActions => size += 8,
                act => {
                    if write_start.map_or(false, |ws| i >= ws) {
                        write_len += Action0x03::size_of(act);
                    } else {
                        apply_len += Action0x03::size_of(act);
                    }
                }
            }
        }
        if apply_len > 0 || write_start.is_none() {
            size += 8 + apply_len;
        }
        if write_start.is_some() {
            size += 8 + write_len;
        }
        size
    }
}

pub struct FlowMod0x03;

impl FlowMod0x03 {
    pub fn size_of(fm: &FlowMod) -> usize {
        40 + Pattern0x03::size_of(&fm.pattern)
            + Instruction0x03::size_of_sequence(&fm.actions, fm.write_start)
    }

    pub fn parse(buf: &[u8]) -> Result<FlowMod, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let cookie = bytes.read_u64::<BigEndian>()?;
        let cookie_mask = bytes.read_u64::<BigEndian>()?;
        let table = TableId(bytes.read_u8()?);
        let command_byte = bytes.read_u8()?;
        let command = FlowModCmd::of_int(command_byte as u16).ok_or_else(|| {
            OfpSerializationError::UnexpectedValueError {
                value: format!("{}", command_byte),
                field: "command".to_string(),
                message: "flow mod".to_string(),
            }
        })?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let priority = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_i32::<BigEndian>()?;
        let out_port = PseudoPort0x02::of_int(bytes.read_u32::<BigEndian>()?)?;
        let _out_group = bytes.read_u32::<BigEndian>()?;
        let flags = bytes.read_u16::<BigEndian>()?;
        bytes.consume(2);
        let pattern = Pattern0x03::parse(&mut bytes)?;
        let (actions, write_start) = Instruction0x03::parse_sequence(&mut bytes)?;
        Ok(FlowMod {
            table,
            command,
            pattern,
            priority,
            actions,
            write_start,
            cookie,
            cookie_mask,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: flags & 1 != 0,
            apply_to_packet: match buffer_id {
                -1 => None,
                n => Some(n as u32),
            },
            out_port,
            check_overlap: flags & 2 != 0,
            emergency: false,
        })
    }

    pub fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u64::<BigEndian>(fm.cookie).unwrap();
        bytes.write_u64::<BigEndian>(fm.cookie_mask).unwrap();
        bytes.write_u8(fm.table.0).unwrap();
        bytes.write_u8(fm.command as u8).unwrap();
        bytes
            .write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout))
            .unwrap();
        bytes
            .write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout))
            .unwrap();
        bytes.write_u16::<BigEndian>(fm.priority).unwrap();
        bytes
            .write_i32::<BigEndian>(match fm.apply_to_packet {
                None => -1,
                Some(id) => id as i32,
            })
            .unwrap();
        match fm.out_port {
            None => bytes
                .write_u32::<BigEndian>(OfpPort::OFPPNone as u32)
                .unwrap(),
            Some(pp) => PseudoPort0x02::marshal(pp, bytes),
        }
        bytes.write_u32::<BigEndian>(OfpPort::OFPPNone as u32).unwrap();
        let flags = (fm.notify_when_removed as u16) | ((fm.check_overlap as u16) << 1);
        bytes.write_u16::<BigEndian>(flags).unwrap();
        write_padding_bytes(bytes, 2);
        Pattern0x03::marshal(fm.pattern, bytes)?;
        Instruction0x03::marshal_sequence(fm.actions, fm.write_start, bytes)
    }
}

pub mod message {
    use super::*;

    pub struct Message0x03 {
        inner: Message,
    }

    impl From<Message> for Message0x03 {
        fn from(m: Message) -> Self {
            Message0x03 { inner: m }
        }
    }

    impl Message0x03 {
        pub fn message(self) -> Message {
            self.inner
        }

        fn msg_code_to_u8(code: &MsgCode) -> u8 {
            match code {
                MsgCode::Hello => 0,
                MsgCode::Error => 1,
                MsgCode::EchoReq => 2,
                MsgCode::EchoResp => 3,
                MsgCode::Vendor => 4,
                MsgCode::FeaturesReq => 5,
                MsgCode::FeaturesResp => 6,
                MsgCode::GetConfigReq => 7,
                MsgCode::GetConfigResp => 8,
                MsgCode::SetConfig => 9,
                MsgCode::PacketIn => 10,
                MsgCode::FlowRemoved => 11,
                MsgCode::PortStatus => 12,
                MsgCode::PacketOut => 13,
                MsgCode::FlowMod => 14,
                MsgCode::PortMod => 16,
                MsgCode::StatsReq => 18,
                MsgCode::StatsResp => 19,
                MsgCode::BarrierReq => 20,
                MsgCode::BarrierResp => 21,
                MsgCode::QueueGetConfigReq => 22,
                MsgCode::QueueGetConfigResp => 23,
            }
        }

        fn msg_code_of_u8(typ: u8) -> Result<MsgCode, OfpSerializationError> {
            let code = match typ {
                0 => MsgCode::Hello,
                1 => MsgCode::Error,
                2 => MsgCode::EchoReq,
                3 => MsgCode::EchoResp,
                4 => MsgCode::Vendor,
                5 => MsgCode::FeaturesReq,
                6 => MsgCode::FeaturesResp,
                10 => MsgCode::PacketIn,
                11 => MsgCode::FlowRemoved,
                12 => MsgCode::PortStatus,
                13 => MsgCode::PacketOut,
                14 => MsgCode::FlowMod,
                20 => MsgCode::BarrierReq,
                21 => MsgCode::BarrierResp,
                t => {
                    return Err(OfpSerializationError::UnexpectedValueError {
                        value: format!("0x{:x}", t),
                        field: "message type".to_string(),
                        message: "message header".to_string(),
                    })
                }
            };
            Ok(code)
        }

        fn body_size(msg: &Message) -> usize {
            match msg {
                Message::Hello => 0,
                Message::Error(Error::Error(_, body)) => 4 + body.len(),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => buf.len(),
                Message::FeaturesReq => 0,
                Message::FeaturesReply(sf) => {
                    24 + sf.ports.as_ref().map_or(0, |p| p.len() * 64)
                }
                Message::FlowMod(fm) => FlowMod0x03::size_of(fm),
                Message::PacketIn(pi) => {
                    let mut pattern = Pattern::match_all();
                    pattern.in_port = Some(pi.port);
                    10 + Pattern0x03::size_of(&pattern) + Payload::size_of(&pi.input_payload)
                }
                Message::PacketOut(po) => {
                    16 + Action0x03::size_of_sequence(&po.apply_actions)
                        + Payload::size_of(&po.output_payload)
                }
                Message::FlowRemoved(fr) => 40 + Pattern0x03::size_of(&fr.pattern),
                Message::PortStatus(_) => 8 + 64,
                Message::BarrierRequest | Message::BarrierReply => 0,
                _ => 0,
            }
        }

        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
            match msg {
                Message::Hello => Ok(()),
                Message::Error(Error::Error(et, body)) => {
                    let (typ, code) = crate::openflow0x02::error_wire_code(&et);
                    bytes.write_u16::<BigEndian>(typ).unwrap();
                    bytes.write_u16::<BigEndian>(code).unwrap();
                    bytes.extend_from_slice(&body);
                    Ok(())
                }
                Message::EchoRequest(buf) | Message::EchoReply(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::FeaturesReq => Ok(()),
                Message::FeaturesReply(sf) => {
                    bytes.write_u64::<BigEndian>(sf.datapath_id).unwrap();
                    bytes.write_u32::<BigEndian>(sf.num_buffers).unwrap();
                    bytes.write_u8(sf.num_tables).unwrap();
                    write_padding_bytes(bytes, 3);
                    let c = sf.supported_capabilities;
                    let caps = bit(0, 0u64, c.flow_stats);
                    let caps = bit(1, caps, c.table_stats);
                    let caps = bit(2, caps, c.port_stats);
                    let caps = bit(5, caps, c.ip_reasm);
                    let caps = bit(6, caps, c.queue_stats);
                    bytes.write_u32::<BigEndian>(caps as u32).unwrap();
                    bytes.write_u32::<BigEndian>(0).unwrap();
                    if let Some(ports) = sf.ports {
                        for pd in ports {
                            PortDesc0x02::marshal(&pd, bytes);
                        }
                    }
                    Ok(())
                }
                Message::FlowMod(fm) => FlowMod0x03::marshal(fm, bytes),
                Message::PacketIn(pi) => {
                    bytes
                        .write_i32::<BigEndian>(match pi.input_payload {
                            Payload::Buffered(n, _) => n as i32,
                            Payload::NotBuffered(_) => -1,
                        })
                        .unwrap();
                    bytes.write_u16::<BigEndian>(pi.total_len).unwrap();
                    bytes.write_u8(pi.reason as u8).unwrap();
                    bytes.write_u8(0).unwrap(); // table id
                    let mut pattern = Pattern::match_all();
                    pattern.in_port = Some(pi.port);
                    Pattern0x03::marshal(pattern, bytes)?;
                    write_padding_bytes(bytes, 2);
                    bytes.extend_from_slice(pi.input_payload.bytes());
                    Ok(())
                }
                Message::PacketOut(po) => {
                    bytes
                        .write_i32::<BigEndian>(match po.output_payload {
                            Payload::Buffered(n, _) => n as i32,
                            Payload::NotBuffered(_) => -1,
                        })
                        .unwrap();
                    match po.port_id {
                        Some(id) => PseudoPort0x02::marshal(PseudoPort::PhysicalPort(id), bytes),
                        None => bytes
                            .write_u32::<BigEndian>(OfpPort::OFPPController as u32)
                            .unwrap(),
                    }
                    bytes
                        .write_u16::<BigEndian>(
                            Action0x03::size_of_sequence(&po.apply_actions) as u16
                        )
                        .unwrap();
                    write_padding_bytes(bytes, 6);
                    for act in po.apply_actions {
                        Action0x03::marshal(act, bytes)?;
                    }
                    bytes.extend_from_slice(po.output_payload.bytes());
                    Ok(())
                }
                Message::FlowRemoved(fr) => {
                    bytes.write_u64::<BigEndian>(fr.cookie).unwrap();
                    bytes.write_u16::<BigEndian>(fr.priority).unwrap();
                    bytes.write_u8(fr.reason as u8).unwrap();
                    bytes.write_u8(0).unwrap();
                    bytes.write_u32::<BigEndian>(fr.duration_sec).unwrap();
                    bytes.write_u32::<BigEndian>(fr.duration_nsec).unwrap();
                    bytes
                        .write_u16::<BigEndian>(Timeout::to_int(fr.idle_timeout))
                        .unwrap();
                    write_padding_bytes(bytes, 2);
                    bytes.write_u64::<BigEndian>(fr.packet_count).unwrap();
                    bytes.write_u64::<BigEndian>(fr.byte_count).unwrap();
                    Pattern0x03::marshal(fr.pattern, bytes)
                }
                Message::PortStatus(ps) => {
                    bytes.write_u8(ps.reason as u8).unwrap();
                    write_padding_bytes(bytes, 7);
                    PortDesc0x02::marshal(&ps.desc, bytes);
                    Ok(())
                }
                Message::BarrierRequest | Message::BarrierReply => Ok(()),
                other => Err(OfpSerializationError::UnimplementedFeatureInVersion {
                    version: OPENFLOW_0_03_VERSION,
                    feature: format!("marshaling {:?}", other),
                }),
            }
        }

        fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::Vendor(_) => MsgCode::Vendor,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::GetConfigReq => MsgCode::GetConfigReq,
                Message::GetConfigReply(_) => MsgCode::GetConfigResp,
                Message::SetConfig(_) => MsgCode::SetConfig,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::FlowRemoved(_) => MsgCode::FlowRemoved,
                Message::PortStatus(_) => MsgCode::PortStatus,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::PortMod(_) => MsgCode::PortMod,
                Message::BarrierRequest => MsgCode::BarrierReq,
                Message::BarrierReply => MsgCode::BarrierResp,
                Message::StatsRequest(_) => MsgCode::StatsReq,
                Message::StatsReply(_) => MsgCode::StatsResp,
                Message::QueueGetConfigReq { .. } => MsgCode::QueueGetConfigReq,
            }
        }
    }

    impl OfpMessage for Message0x03 {
        fn size_of(msg: &Message0x03) -> usize {
            OfpHeader::size() + Message0x03::body_size(&msg.inner)
        }

        fn header_of(xid: u32, msg: &Message0x03) -> Result<OfpHeader, OfpSerializationError> {
            Ok(OfpHeader::new(
                OPENFLOW_0_03_VERSION,
                Self::msg_code_to_u8(&Self::msg_code_of_message(&msg.inner)),
                Self::size_of(msg) as u16,
                xid,
            ))
        }

        fn marshal(xid: u32, msg: Message0x03) -> Result<Vec<u8>, OfpSerializationError> {
            let hdr = Self::header_of(xid, &msg)?;
            let mut bytes = vec![];
            OfpHeader::marshal(&mut bytes, hdr);
            Message0x03::marshal_body(msg.inner, &mut bytes)?;
            Ok(bytes)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message0x03), OfpSerializationError> {
            let code = Self::msg_code_of_u8(header.type_byte())?;
            let inner = match code {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => {
                    let mut bytes = Cursor::new(buf.to_vec());
                    let typ = bytes.read_u16::<BigEndian>()?;
                    let error_code = bytes.read_u16::<BigEndian>()?;
                    let et = crate::openflow0x02::error_internal_code(typ, error_code)?;
                    Message::Error(Error::Error(et, bytes.fill_buf()?.to_vec()))
                }
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FlowMod => Message::FlowMod(FlowMod0x03::parse(buf)?),
                MsgCode::PacketIn => {
                    let mut bytes = Cursor::new(buf.to_vec());
                    let buf_id = bytes.read_i32::<BigEndian>()?;
                    let total_len = bytes.read_u16::<BigEndian>()?;
                    let reason_byte = bytes.read_u8()?;
                    let reason = PacketInReason::of_int(reason_byte).ok_or_else(|| {
                        OfpSerializationError::UnexpectedValueError {
                            value: format!("{}", reason_byte),
                            field: "reason".to_string(),
                            message: "packet in".to_string(),
                        }
                    })?;
                    bytes.consume(1);
                    let pattern = Pattern0x03::parse(&mut bytes)?;
                    bytes.consume(2);
                    let data = bytes.fill_buf()?.to_vec();
                    Message::PacketIn(PacketIn {
                        input_payload: match buf_id {
                            -1 => Payload::NotBuffered(data),
                            n => Payload::Buffered(n as u32, data),
                        },
                        total_len,
                        port: pattern.in_port.unwrap_or(0),
                        reason,
                    })
                }
                MsgCode::PacketOut => {
                    let mut bytes = Cursor::new(buf.to_vec());
                    let buf_id = bytes.read_i32::<BigEndian>()?;
                    let in_port = bytes.read_u32::<BigEndian>()?;
                    let actions_len = bytes.read_u16::<BigEndian>()? as usize;
                    bytes.consume(6);
                    if bytes.remaining() < actions_len {
                        return Err(OfpSerializationError::BadLength {
                            message: "packet out actions".to_string(),
                        });
                    }
                    let mut actions_buf = vec![0; actions_len];
                    bytes.read_exact(&mut actions_buf)?;
                    let mut cursor = Cursor::new(actions_buf);
                    let actions = Action0x03::parse_sequence(&mut cursor)?;
                    let data = bytes.fill_buf()?.to_vec();
                    Message::PacketOut(PacketOut {
                        output_payload: match buf_id {
                            -1 => Payload::NotBuffered(data),
                            n => Payload::Buffered(n as u32, data),
                        },
                        port_id: if in_port == OfpPort::OFPPController as u32 {
                            None
                        } else {
                            Some(in_port as u16)
                        },
                        apply_actions: actions,
                    })
                }
                MsgCode::FlowRemoved => {
                    let mut bytes = Cursor::new(buf.to_vec());
                    let cookie = bytes.read_u64::<BigEndian>()?;
                    let priority = bytes.read_u16::<BigEndian>()?;
                    let reason_byte = bytes.read_u8()?;
                    let reason = FlowRemovedReason::of_int(reason_byte).ok_or_else(|| {
                        OfpSerializationError::UnexpectedValueError {
                            value: format!("{}", reason_byte),
                            field: "reason".to_string(),
                            message: "flow removed".to_string(),
                        }
                    })?;
                    bytes.consume(1);
                    let duration_sec = bytes.read_u32::<BigEndian>()?;
                    let duration_nsec = bytes.read_u32::<BigEndian>()?;
                    let idle_timeout = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
                    bytes.consume(2);
                    let packet_count = bytes.read_u64::<BigEndian>()?;
                    let byte_count = bytes.read_u64::<BigEndian>()?;
                    let pattern = Pattern0x03::parse(&mut bytes)?;
                    Message::FlowRemoved(FlowRemoved {
                        pattern,
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
                MsgCode::PortStatus => {
                    let mut bytes = Cursor::new(buf.to_vec());
                    let reason_byte = bytes.read_u8()?;
                    let reason = PortReason::of_int(reason_byte).ok_or_else(|| {
                        OfpSerializationError::UnexpectedValueError {
                            value: format!("{}", reason_byte),
                            field: "reason".to_string(),
                            message: "port status".to_string(),
                        }
                    })?;
                    bytes.consume(7);
                    let desc = PortDesc0x02::parse(&mut bytes)?;
                    Message::PortStatus(PortStatus { reason, desc })
                }
                MsgCode::BarrierReq => Message::BarrierRequest,
                MsgCode::BarrierResp => Message::BarrierReply,
                code => {
                    return Err(OfpSerializationError::UnsupportedMessageCode {
                        version: OPENFLOW_0_03_VERSION,
                        code,
                    })
                }
            };
            Ok((header.xid(), Message0x03 { inner }))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const TEST_XID: u32 = 0x10203040;

        fn roundtrip(message: Message) -> Message {
            let data = Message0x03::marshal(TEST_XID, Message0x03::from(message)).unwrap();
            let header = OfpHeader::parse(&data[..OfpHeader::size()]).unwrap();
            assert_eq!(header.version(), OPENFLOW_0_03_VERSION);
            assert_eq!(header.length(), data.len());
            let (_, msg) = Message0x03::parse(&header, &data[OfpHeader::size()..]).unwrap();
            msg.inner
        }

        fn pattern() -> Pattern {
            let mut p = Pattern::match_all();
            p.in_port = Some(2);
            p.dl_typ = Some(0x0800);
            p.nw_proto = Some(6);
            p.nw_dst = Some(Mask::masked(0xc0a80000, 16));
            p.tp_dst = Some(443);
            p
        }

        fn flow_mod(actions: Vec<Action>, write_start: Option<usize>) -> FlowMod {
            FlowMod {
                table: TableId(0),
                command: FlowModCmd::AddFlow,
                pattern: pattern(),
                priority: 700,
                actions,
                write_start,
                cookie: 0x1111,
                cookie_mask: 0,
                idle_timeout: Timeout::Permanent,
                hard_timeout: Timeout::ExpiresAfter(60),
                notify_when_removed: false,
                apply_to_packet: None,
                out_port: None,
                check_overlap: false,
                emergency: false,
            }
        }

        #[test]
        fn flow_mod_with_oxm_match_roundtrip() {
            let fm = flow_mod(vec![Action::Output(PseudoPort::PhysicalPort(9))], None);
            let msg = Message::FlowMod(fm);
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn flow_mod_with_set_field_actions_roundtrip() {
            let fm = flow_mod(
                vec![
                    Action::SetDlSrc(0x020000000001),
                    Action::SetNwDst(0x0a00000a),
                    Action::SetTpDst(8443),
                    Action::SetMplsLabel(7),
                    Action::Output(PseudoPort::PhysicalPort(1)),
                ],
                None,
            );
            let msg = Message::FlowMod(fm);
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn flow_mod_goto_table_roundtrip() {
            let fm = flow_mod(
                vec![
                    Action::Output(PseudoPort::PhysicalPort(1)),
                    Action::GotoTable(3),
                ],
                None,
            );
            let msg = Message::FlowMod(fm);
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn oxm_match_is_padded_to_eight_bytes() {
            let mut p = Pattern::match_all();
            p.in_port = Some(1); // one 8-byte entry -> header 4 + 8 = 12 -> pad to 16
            assert_eq!(Pattern0x03::size_of(&p), 16);
        }

        #[test]
        fn packet_in_roundtrip() {
            let msg = Message::PacketIn(PacketIn {
                input_payload: Payload::Buffered(12, vec![0xaa; 14]),
                total_len: 14,
                port: 6,
                reason: PacketInReason::ExplicitSend,
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn flow_removed_roundtrip() {
            let msg = Message::FlowRemoved(FlowRemoved {
                pattern: pattern(),
                cookie: 9,
                priority: 8,
                reason: FlowRemovedReason::HardTimeout,
                duration_sec: 7,
                duration_nsec: 6,
                idle_timeout: Timeout::ExpiresAfter(5),
                packet_count: 4,
                byte_count: 3,
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn hello_and_barrier_roundtrip() {
            assert_eq!(roundtrip(Message::Hello), Message::Hello);
            assert_eq!(roundtrip(Message::BarrierRequest), Message::BarrierRequest);
        }
    }
}
