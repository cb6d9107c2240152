//! OpenFlow 1.1 wire dialect.
//!
//! A partial dialect in the same shape as the 1.0 module: the message
//! subset the switch actually speaks (hello, echo, error, barrier,
//! features, flow-mod, packet-in/out, flow-removed, port-status) with the
//! 1.1 "standard" 88-byte match and the instruction wrapper around action
//! lists. Instructions are flattened on decode; the wrapper choice is kept
//! as `write_start` metadata on the flow-mod. Everything else reports the
//! version gap instead of guessing.

use std::io::{BufRead, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Buf;

use crate::bits::*;
use crate::message::*;
use crate::ofp_header::{OfpHeader, OPENFLOW_0_02_VERSION};
use crate::ofp_message::{ActionEntryError, OfpMessage, OfpSerializationError};
use crate::ofp_utils::{read_fixed_size_string, write_fixed_size_string, write_padding_bytes};
use crate::openflow::MsgCode;
use crate::packet::{bytes_of_mac, mac_of_bytes};

const OFPMT_STANDARD: u16 = 0;
const OFPMT_STANDARD_LENGTH: usize = 88;

#[repr(u32)]
pub enum OfpPort {
    OFPPMax = 0xffffff00,
    OFPPInPort = 0xfffffff8,
    OFPPTable = 0xfffffff9,
    OFPPNormal = 0xfffffffa,
    OFPPFlood = 0xfffffffb,
    OFPPAll = 0xfffffffc,
    OFPPController = 0xfffffffd,
    OFPPLocal = 0xfffffffe,
    OFPPNone = 0xffffffff,
}

pub struct PseudoPort0x02;

impl PseudoPort0x02 {
    pub fn of_int(p: u32) -> Result<Option<PseudoPort>, OfpSerializationError> {
        if (OfpPort::OFPPNone as u32) == p {
            Ok(None)
        } else {
            Ok(Some(PseudoPort0x02::make(p, 0)?))
        }
    }

    pub fn make(p: u32, len: u64) -> Result<PseudoPort, OfpSerializationError> {
        let res = match p {
            p if p == (OfpPort::OFPPInPort as u32) => PseudoPort::InPort,
            p if p == (OfpPort::OFPPTable as u32) => PseudoPort::Table,
            p if p == (OfpPort::OFPPNormal as u32) => PseudoPort::Normal,
            p if p == (OfpPort::OFPPFlood as u32) => PseudoPort::Flood,
            p if p == (OfpPort::OFPPAll as u32) => PseudoPort::AllPorts,
            p if p == (OfpPort::OFPPController as u32) => PseudoPort::Controller(len),
            p if p == (OfpPort::OFPPLocal as u32) => PseudoPort::Local,
            _ => {
                if p <= (OfpPort::OFPPMax as u32) && p <= 0xffff {
                    PseudoPort::PhysicalPort(p as u16)
                } else {
                    return Err(OfpSerializationError::UnexpectedValueError {
                        value: format!("{:x}", p),
                        field: "port number".to_string(),
                        message: "".to_string(),
                    });
                }
            }
        };
        Ok(res)
    }

    pub fn marshal(pp: PseudoPort, bytes: &mut Vec<u8>) {
        let v = match pp {
            PseudoPort::PhysicalPort(p) => p as u32,
            PseudoPort::InPort => OfpPort::OFPPInPort as u32,
            PseudoPort::Table => OfpPort::OFPPTable as u32,
            PseudoPort::Normal => OfpPort::OFPPNormal as u32,
            PseudoPort::Flood => OfpPort::OFPPFlood as u32,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u32,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u32,
            PseudoPort::Local => OfpPort::OFPPLocal as u32,
        };
        bytes.write_u32::<BigEndian>(v).unwrap();
    }
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput = 0,
    OFPATSetVlanVId = 1,
    OFPATSetVlanPCP = 2,
    OFPATSetDlSrc = 3,
    OFPATSetDlDst = 4,
    OFPATSetNwSrc = 5,
    OFPATSetNwDst = 6,
    OFPATSetNwTos = 7,
    OFPATSetTpSrc = 9,
    OFPATSetTpDst = 10,
    OFPATCopyTtlOut = 11,
    OFPATSetMplsLabel = 13,
    OFPATSetMplsTc = 14,
    OFPATSetMplsTtl = 15,
    OFPATDecMplsTtl = 16,
    OFPATPushVlan = 17,
    OFPATPopVlan = 18,
    OFPATPushMpls = 19,
    OFPATPopMpls = 20,
    OFPATSetQueue = 21,
    OFPATSetNwTtl = 23,
    OFPATDecNwTtl = 24,
}

pub struct Action0x02;

impl Action0x02 {
    pub fn size_of(a: &Action) -> usize {
        match *a {
            Action::Output(_) => 16,
            Action::SetDlSrc(_) | Action::SetDlDst(_) => 16,
            _ => 8,
        }
    }

    pub fn size_of_sequence(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| !Instruction0x02::is_instruction_action(a))
            .fold(0, |acc, x| Action0x02::size_of(x) + acc)
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
            t if t == (OfpActionType::OFPATOutput as u16) => {
                let port = bytes.read_u32::<BigEndian>()?;
                let max_len = bytes.read_u16::<BigEndian>()?;
                bytes.consume(6);
                Action::Output(PseudoPort0x02::make(port, max_len as u64)?)
            }
            t if t == (OfpActionType::OFPATSetVlanVId as u16) => {
                let vid = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                Action::SetDlVlan(Some(vid))
            }
            t if t == (OfpActionType::OFPATSetVlanPCP as u16) => {
                let pcp = bytes.read_u8()?;
                bytes.consume(3);
                Action::SetDlVlanPcp(pcp)
            }
            t if t == (OfpActionType::OFPATSetDlSrc as u16) => {
                let mut mac = [0u8; 6];
                bytes.read_exact(&mut mac)?;
                bytes.consume(6);
                Action::SetDlSrc(mac_of_bytes(mac))
            }
            t if t == (OfpActionType::OFPATSetDlDst as u16) => {
                let mut mac = [0u8; 6];
                bytes.read_exact(&mut mac)?;
                bytes.consume(6);
                Action::SetDlDst(mac_of_bytes(mac))
            }
            t if t == (OfpActionType::OFPATSetNwSrc as u16) => {
                Action::SetNwSrc(bytes.read_u32::<BigEndian>()?)
            }
            t if t == (OfpActionType::OFPATSetNwDst as u16) => {
                Action::SetNwDst(bytes.read_u32::<BigEndian>()?)
            }
            t if t == (OfpActionType::OFPATSetNwTos as u16) => {
                let tos = bytes.read_u8()?;
                bytes.consume(3);
                Action::SetNwTos(tos)
            }
            t if t == (OfpActionType::OFPATSetTpSrc as u16) => {
                let pt = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                Action::SetTpSrc(pt)
            }
            t if t == (OfpActionType::OFPATSetTpDst as u16) => {
                let pt = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                Action::SetTpDst(pt)
            }
            t if t == (OfpActionType::OFPATSetMplsLabel as u16) => {
                Action::SetMplsLabel(bytes.read_u32::<BigEndian>()?)
            }
            t if t == (OfpActionType::OFPATSetMplsTc as u16) => {
                let tc = bytes.read_u8()?;
                bytes.consume(3);
                Action::SetMplsTc(tc)
            }
            t if t == (OfpActionType::OFPATSetMplsTtl as u16) => {
                let ttl = bytes.read_u8()?;
                bytes.consume(3);
                Action::SetMplsTtl(ttl)
            }
            t if t == (OfpActionType::OFPATDecMplsTtl as u16) => {
                bytes.consume(4);
                Action::DecMplsTtl
            }
            t if t == (OfpActionType::OFPATPushVlan as u16) => {
                let ethertype = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                Action::PushVlan(ethertype)
            }
            t if t == (OfpActionType::OFPATPopVlan as u16) => {
                bytes.consume(4);
                Action::SetDlVlan(None)
            }
            t if t == (OfpActionType::OFPATPushMpls as u16) => {
                let ethertype = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                Action::PushMpls(ethertype)
            }
            t if t == (OfpActionType::OFPATPopMpls as u16) => {
                let ethertype = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                Action::PopMpls(ethertype)
            }
            t if t == (OfpActionType::OFPATSetQueue as u16) => {
                Action::SetQueue(bytes.read_u32::<BigEndian>()?)
            }
            t if t == (OfpActionType::OFPATDecNwTtl as u16) => {
                bytes.consume(4);
                Action::DecTtl
            }
            t => {
                return Err(OfpSerializationError::BadActionEntry {
                    kind: ActionEntryError::BadType,
                    detail: format!("0x{:x}", t),
                });
            }
        };
        Ok(action)
    }

    pub fn parse_sequence(bytes: &mut Cursor<Vec<u8>>) -> Result<Vec<Action>, OfpSerializationError> {
        let mut v = vec![];
        while bytes.remaining() > 0 {
            v.push(Action0x02::parse_one(bytes)?);
        }
        Ok(v)
    }

    pub fn marshal(act: Action, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        let unimplemented = |feature: &str| OfpSerializationError::UnimplementedFeatureInVersion {
            version: OPENFLOW_0_02_VERSION,
            feature: feature.to_string(),
        };
        let put = |bytes: &mut Vec<u8>, code: OfpActionType, len: usize| {
            bytes.write_u16::<BigEndian>(code as u16).unwrap();
            bytes.write_u16::<BigEndian>(len as u16).unwrap();
        };
        match act {
            Action::Output(pp) => {
                put(bytes, OfpActionType::OFPATOutput, 16);
                PseudoPort0x02::marshal(pp, bytes);
                bytes
                    .write_u16::<BigEndian>(match pp {
                        PseudoPort::Controller(w) => w as u16,
                        _ => 0,
                    })
                    .unwrap();
                write_padding_bytes(bytes, 6);
            }
            Action::SetDlVlan(Some(vid)) => {
                put(bytes, OfpActionType::OFPATSetVlanVId, 8);
                bytes.write_u16::<BigEndian>(vid).unwrap();
                write_padding_bytes(bytes, 2);
            }
            Action::SetDlVlan(None) => {
                put(bytes, OfpActionType::OFPATPopVlan, 8);
                write_padding_bytes(bytes, 4);
            }
            Action::SetDlVlanPcp(pcp) => {
                put(bytes, OfpActionType::OFPATSetVlanPCP, 8);
                bytes.write_u8(pcp).unwrap();
                write_padding_bytes(bytes, 3);
            }
            Action::SetDlSrc(mac) => {
                put(bytes, OfpActionType::OFPATSetDlSrc, 16);
                bytes.extend_from_slice(&bytes_of_mac(mac));
                write_padding_bytes(bytes, 6);
            }
            Action::SetDlDst(mac) => {
                put(bytes, OfpActionType::OFPATSetDlDst, 16);
                bytes.extend_from_slice(&bytes_of_mac(mac));
                write_padding_bytes(bytes, 6);
            }
            Action::SetNwSrc(addr) => {
                put(bytes, OfpActionType::OFPATSetNwSrc, 8);
                bytes.write_u32::<BigEndian>(addr).unwrap();
            }
            Action::SetNwDst(addr) => {
                put(bytes, OfpActionType::OFPATSetNwDst, 8);
                bytes.write_u32::<BigEndian>(addr).unwrap();
            }
            Action::SetNwTos(tos) => {
                put(bytes, OfpActionType::OFPATSetNwTos, 8);
                bytes.write_u8(tos).unwrap();
                write_padding_bytes(bytes, 3);
            }
            Action::SetTpSrc(pt) => {
                put(bytes, OfpActionType::OFPATSetTpSrc, 8);
                bytes.write_u16::<BigEndian>(pt).unwrap();
                write_padding_bytes(bytes, 2);
            }
            Action::SetTpDst(pt) => {
                put(bytes, OfpActionType::OFPATSetTpDst, 8);
                bytes.write_u16::<BigEndian>(pt).unwrap();
                write_padding_bytes(bytes, 2);
            }
            Action::SetMplsLabel(label) => {
                put(bytes, OfpActionType::OFPATSetMplsLabel, 8);
                bytes.write_u32::<BigEndian>(label).unwrap();
            }
            Action::SetMplsTc(tc) => {
                put(bytes, OfpActionType::OFPATSetMplsTc, 8);
                bytes.write_u8(tc).unwrap();
                write_padding_bytes(bytes, 3);
            }
            Action::SetMplsTtl(ttl) => {
                put(bytes, OfpActionType::OFPATSetMplsTtl, 8);
                bytes.write_u8(ttl).unwrap();
                write_padding_bytes(bytes, 3);
            }
            Action::DecMplsTtl => {
                put(bytes, OfpActionType::OFPATDecMplsTtl, 8);
                write_padding_bytes(bytes, 4);
            }
            Action::PushVlan(ethertype) => {
                put(bytes, OfpActionType::OFPATPushVlan, 8);
                bytes.write_u16::<BigEndian>(ethertype).unwrap();
                write_padding_bytes(bytes, 2);
            }
            Action::PushMpls(ethertype) => {
                put(bytes, OfpActionType::OFPATPushMpls, 8);
                bytes.write_u16::<BigEndian>(ethertype).unwrap();
                write_padding_bytes(bytes, 2);
            }
            Action::PopMpls(ethertype) => {
                put(bytes, OfpActionType::OFPATPopMpls, 8);
                bytes.write_u16::<BigEndian>(ethertype).unwrap();
                write_padding_bytes(bytes, 2);
            }
            Action::SetQueue(q) => {
                put(bytes, OfpActionType::OFPATSetQueue, 8);
                bytes.write_u32::<BigEndian>(q).unwrap();
            }
            Action::DecTtl => {
                put(bytes, OfpActionType::OFPATDecNwTtl, 8);
                write_padding_bytes(bytes, 4);
            }
            Action::Enqueue(_, _) => return Err(unimplemented("enqueue action")),
            other => {
                return Err(unimplemented(&format!("action {:?}", other)));
            }
        }
        Ok(())
    }
}

const OFPIT_GOTO_TABLE: u16 = 1;
const OFPIT_WRITE_METADATA: u16 = 2;
const OFPIT_WRITE_ACTIONS: u16 = 3;
const OFPIT_APPLY_ACTIONS: u16 = 4;
const OFPIT_CLEAR_ACTIONS: u16 = 5;

/// The 1.1 instruction wrapper, flattened to the internal action list plus
/// the `write_start` marker.
pub struct Instruction0x02;

impl Instruction0x02 {
    pub fn is_instruction_action(a: &Action) -> bool {
        matches!(
            a,
            Action::GotoTable(_) | Action::WriteMetadata { .. } | Action::ClearActions
        )
    }

    /// Decode an instruction list into `(actions, write_start)`.
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
                OFPIT_GOTO_TABLE => {
                    let table = bytes.read_u8()?;
                    bytes.consume(3);
                    tail.push(Action::GotoTable(table));
                }
                OFPIT_WRITE_METADATA => {
                    bytes.consume(4);
                    let metadata = bytes.read_u64::<BigEndian>()?;
                    let mask = bytes.read_u64::<BigEndian>()?;
                    tail.push(Action::WriteMetadata { metadata, mask });
                }
                OFPIT_WRITE_ACTIONS | OFPIT_APPLY_ACTIONS => {
                    bytes.consume(4);
                    let mut actions_buf = vec![0; len - 8];
                    bytes.read_exact(&mut actions_buf)?;
                    let mut cursor = Cursor::new(actions_buf);
                    let actions = Action0x02::parse_sequence(&mut cursor)?;
                    if typ == OFPIT_APPLY_ACTIONS {
                        apply.extend(actions);
                    } else {
                        write.get_or_insert_with(Vec::new).extend(actions);
                    }
                }
                OFPIT_CLEAR_ACTIONS => {
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

    /// Encode `(actions, write_start)` back into an instruction list, in the
    /// canonical order: apply, write, clear, write-metadata, goto-table.
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
                Action::WriteMetadata {
                    metadata: m,
                    mask,
                } => metadata = Some((m, mask)),
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
            Self::put_action_instruction(OFPIT_APPLY_ACTIONS, apply, bytes)?;
        }
        if write_start.is_some() {
            Self::put_action_instruction(OFPIT_WRITE_ACTIONS, write, bytes)?;
        }
        if clear {
            bytes.write_u16::<BigEndian>(OFPIT_CLEAR_ACTIONS).unwrap();
            bytes.write_u16::<BigEndian>(8).unwrap();
            write_padding_bytes(bytes, 4);
        }
        if let Some((m, mask)) = metadata {
            bytes.write_u16::<BigEndian>(OFPIT_WRITE_METADATA).unwrap();
            bytes.write_u16::<BigEndian>(24).unwrap();
            write_padding_bytes(bytes, 4);
            bytes.write_u64::<BigEndian>(m).unwrap();
            bytes.write_u64::<BigEndian>(mask).unwrap();
        }
        if let Some(t) = goto {
            bytes.write_u16::<BigEndian>(OFPIT_GOTO_TABLE).unwrap();
            bytes.write_u16::<BigEndian>(8).unwrap();
            bytes.write_u8(t).unwrap();
            write_padding_bytes(bytes, 3);
        }
        Ok(())
    }

    fn put_action_instruction(
        typ: u16,
        actions: Vec<Action>,
        bytes: &mut Vec<u8>,
    ) -> Result<(), OfpSerializationError> {
        let len = 8 + Action0x02::size_of_sequence(&actions);
        bytes.write_u16::<BigEndian>(typ).unwrap();
        bytes.write_u16::<BigEndian>(len as u16).unwrap();
        write_padding_bytes(bytes, 4);
        for act in actions {
            Action0x02::marshal(act, bytes)?;
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
                        write_len += Action0x02::size_of(act);
                    } else {
                        apply_len += Action0x02::size_of(act);
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

/// Wildcard flag bits of the 1.1 standard match.
mod wc {
    pub const IN_PORT: u64 = 0;
    pub const DL_VLAN: u64 = 1;
    pub const DL_VLAN_PCP: u64 = 2;
    pub const DL_TYPE: u64 = 3;
    pub const NW_TOS: u64 = 4;
    pub const NW_PROTO: u64 = 5;
    pub const TP_SRC: u64 = 6;
    pub const TP_DST: u64 = 7;
    pub const MPLS_LABEL: u64 = 8;
    pub const MPLS_TC: u64 = 9;
}

pub struct Pattern0x02;

impl Pattern0x02 {
    pub fn size_of(_: &Pattern) -> usize {
        OFPMT_STANDARD_LENGTH
    }

    pub fn parse(bytes: &mut Cursor<Vec<u8>>) -> Result<Pattern, OfpSerializationError> {
        let typ = bytes.read_u16::<BigEndian>()?;
        let length = bytes.read_u16::<BigEndian>()? as usize;
        if typ != OFPMT_STANDARD || length != OFPMT_STANDARD_LENGTH {
            return Err(OfpSerializationError::UnexpectedValueError {
                value: format!("type {} length {}", typ, length),
                field: "match header".to_string(),
                message: "standard match".to_string(),
            });
        }
        let in_port = bytes.read_u32::<BigEndian>()?;
        let wildcards = bytes.read_u32::<BigEndian>()? as u64;
        let mut pattern = Pattern::match_all();
        if !test_bit(wc::IN_PORT, wildcards) {
            if in_port > 0xffff {
                return Err(OfpSerializationError::UnexpectedValueError {
                    value: format!("{}", in_port),
                    field: "in_port".to_string(),
                    message: "standard match".to_string(),
                });
            }
            pattern.in_port = Some(in_port as u16);
        }
        let mut dl_src = [0u8; 6];
        bytes.read_exact(&mut dl_src)?;
        let mut dl_src_mask = [0u8; 6];
        bytes.read_exact(&mut dl_src_mask)?;
        if dl_src_mask.iter().all(|b| *b == 0) {
            pattern.dl_src = Some(mac_of_bytes(dl_src));
        }
        let mut dl_dst = [0u8; 6];
        bytes.read_exact(&mut dl_dst)?;
        let mut dl_dst_mask = [0u8; 6];
        bytes.read_exact(&mut dl_dst_mask)?;
        if dl_dst_mask.iter().all(|b| *b == 0) {
            pattern.dl_dst = Some(mac_of_bytes(dl_dst));
        }
        let dl_vlan = bytes.read_u16::<BigEndian>()?;
        if !test_bit(wc::DL_VLAN, wildcards) {
            // 0xffff matches untagged frames in the 1.1 dialect.
            pattern.dl_vlan = if dl_vlan == 0xffff {
                Some(None)
            } else {
                Some(Some(dl_vlan))
            };
        }
        let dl_vlan_pcp = bytes.read_u8()?;
        if !test_bit(wc::DL_VLAN_PCP, wildcards) {
            pattern.dl_vlan_pcp = Some(dl_vlan_pcp);
        }
        bytes.consume(1);
        let dl_type = bytes.read_u16::<BigEndian>()?;
        if !test_bit(wc::DL_TYPE, wildcards) {
            pattern.dl_typ = Some(dl_type);
        }
        let nw_tos = bytes.read_u8()?;
        if !test_bit(wc::NW_TOS, wildcards) {
            pattern.nw_tos = Some(nw_tos);
        }
        let nw_proto = bytes.read_u8()?;
        if !test_bit(wc::NW_PROTO, wildcards) {
            pattern.nw_proto = Some(nw_proto);
        }
        let nw_src = bytes.read_u32::<BigEndian>()?;
        let nw_src_mask = bytes.read_u32::<BigEndian>()?;
        pattern.nw_src = Self::parse_nw(nw_src, nw_src_mask)?;
        let nw_dst = bytes.read_u32::<BigEndian>()?;
        let nw_dst_mask = bytes.read_u32::<BigEndian>()?;
        pattern.nw_dst = Self::parse_nw(nw_dst, nw_dst_mask)?;
        let tp_src = bytes.read_u16::<BigEndian>()?;
        if !test_bit(wc::TP_SRC, wildcards) {
            pattern.tp_src = Some(tp_src);
        }
        let tp_dst = bytes.read_u16::<BigEndian>()?;
        if !test_bit(wc::TP_DST, wildcards) {
            pattern.tp_dst = Some(tp_dst);
        }
        let mpls_label = bytes.read_u32::<BigEndian>()?;
        if !test_bit(wc::MPLS_LABEL, wildcards) {
            pattern.mpls_label = Some(mpls_label);
        }
        let mpls_tc = bytes.read_u8()?;
        if !test_bit(wc::MPLS_TC, wildcards) {
            pattern.mpls_tc = Some(mpls_tc);
        }
        bytes.consume(3);
        // Metadata is not part of the internal match model.
        bytes.consume(16);
        Ok(pattern)
    }

    fn parse_nw(value: u32, mask: u32) -> Result<Option<Mask<u32>>, OfpSerializationError> {
        // Mask bits that are set are ignored on the wire.
        if mask == 0xffff_ffff {
            return Ok(None);
        }
        let wild = mask.trailing_ones();
        if mask != 0 && (wild == 0 || mask != (1u32 << wild).wrapping_sub(1)) {
            return Err(OfpSerializationError::BadMatchEntry {
                header: 0,
                kind: crate::ofp_message::MatchEntryError::BadMask,
            });
        }
        Ok(Some(Mask {
            value,
            mask: if wild == 0 { None } else { Some(wild) },
        }))
    }

    pub fn marshal(p: Pattern, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        if p.tun_id.is_some()
            || p.regs.iter().any(|r| r.is_some())
            || p.arp_sha.is_some()
            || p.arp_tha.is_some()
            || p.ipv6_src.is_some()
            || p.ipv6_dst.is_some()
            || p.nd_target.is_some()
            || p.ip_frag.is_some()
        {
            return Err(OfpSerializationError::UnimplementedFeatureInVersion {
                version: OPENFLOW_0_02_VERSION,
                feature: "vendor match fields".to_string(),
            });
        }
        bytes.write_u16::<BigEndian>(OFPMT_STANDARD).unwrap();
        bytes
            .write_u16::<BigEndian>(OFPMT_STANDARD_LENGTH as u16)
            .unwrap();
        bytes
            .write_u32::<BigEndian>(p.in_port.unwrap_or(0) as u32)
            .unwrap();
        let wildcards = 0u64;
        let wildcards = bit(wc::IN_PORT, wildcards, p.in_port.is_none());
        let wildcards = bit(wc::DL_VLAN, wildcards, p.dl_vlan.is_none());
        let wildcards = bit(wc::DL_VLAN_PCP, wildcards, p.dl_vlan_pcp.is_none());
        let wildcards = bit(wc::DL_TYPE, wildcards, p.dl_typ.is_none());
        let wildcards = bit(wc::NW_TOS, wildcards, p.nw_tos.is_none());
        let wildcards = bit(wc::NW_PROTO, wildcards, p.nw_proto.is_none());
        let wildcards = bit(wc::TP_SRC, wildcards, p.tp_src.is_none());
        let wildcards = bit(wc::TP_DST, wildcards, p.tp_dst.is_none());
        let wildcards = bit(wc::MPLS_LABEL, wildcards, p.mpls_label.is_none());
        let wildcards = bit(wc::MPLS_TC, wildcards, p.mpls_tc.is_none());
        bytes.write_u32::<BigEndian>(wildcards as u32).unwrap();
        bytes.extend_from_slice(&bytes_of_mac(p.dl_src.unwrap_or(0)));
        bytes.extend_from_slice(&if p.dl_src.is_some() {
            [0u8; 6]
        } else {
            [0xff; 6]
        });
        bytes.extend_from_slice(&bytes_of_mac(p.dl_dst.unwrap_or(0)));
        bytes.extend_from_slice(&if p.dl_dst.is_some() {
            [0u8; 6]
        } else {
            [0xff; 6]
        });
        let vlan = match p.dl_vlan {
            Some(Some(v)) => v,
            Some(None) => 0xffff,
            None => 0,
        };
        bytes.write_u16::<BigEndian>(vlan).unwrap();
        bytes.write_u8(p.dl_vlan_pcp.unwrap_or(0)).unwrap();
        bytes.write_u8(0).unwrap();
        bytes.write_u16::<BigEndian>(p.dl_typ.unwrap_or(0)).unwrap();
        bytes.write_u8(p.nw_tos.unwrap_or(0)).unwrap();
        bytes.write_u8(p.nw_proto.unwrap_or(0)).unwrap();
        Self::marshal_nw(&p.nw_src, bytes);
        Self::marshal_nw(&p.nw_dst, bytes);
        bytes.write_u16::<BigEndian>(p.tp_src.unwrap_or(0)).unwrap();
        bytes.write_u16::<BigEndian>(p.tp_dst.unwrap_or(0)).unwrap();
        bytes
            .write_u32::<BigEndian>(p.mpls_label.unwrap_or(0))
            .unwrap();
        bytes.write_u8(p.mpls_tc.unwrap_or(0)).unwrap();
        write_padding_bytes(bytes, 3);
        write_padding_bytes(bytes, 16); // metadata + mask
        Ok(())
    }

    fn marshal_nw(m: &Option<Mask<u32>>, bytes: &mut Vec<u8>) {
        match m {
            None => {
                bytes.write_u32::<BigEndian>(0).unwrap();
                bytes.write_u32::<BigEndian>(0xffff_ffff).unwrap();
            }
            Some(mask) => {
                bytes.write_u32::<BigEndian>(mask.value).unwrap();
                let wire_mask = match mask.mask {
                    None => 0,
                    Some(wild) => (low_bits(wild.min(32) as u32) & 0xffff_ffff) as u32,
                };
                bytes.write_u32::<BigEndian>(wire_mask).unwrap();
            }
        }
    }
}

impl MessageType for FlowMod {
    fn size_of(fm: &FlowMod) -> usize {
        40 + OFPMT_STANDARD_LENGTH + Instruction0x02::size_of_sequence(&fm.actions, fm.write_start)
    }

    fn parse(buf: &[u8]) -> Result<FlowMod, OfpSerializationError> {
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
        let pattern = Pattern0x02::parse(&mut bytes)?;
        let (actions, write_start) = Instruction0x02::parse_sequence(&mut bytes)?;
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

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
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
        bytes.write_u32::<BigEndian>(OfpPort::OFPPNone as u32).unwrap(); // out_group: any
        let flags = (fm.notify_when_removed as u16) | ((fm.check_overlap as u16) << 1);
        bytes.write_u16::<BigEndian>(flags).unwrap();
        write_padding_bytes(bytes, 2);
        Pattern0x02::marshal(fm.pattern, bytes)?;
        Instruction0x02::marshal_sequence(fm.actions, fm.write_start, bytes)
    }
}

/// Map the internal error taxonomy onto the 1.1/1.2 wire numbering, which
/// has a native BAD_MATCH type and renumbered flow-mod failure codes.
pub fn error_wire_code(et: &ErrorType) -> (u16, u16) {
    match *et {
        ErrorType::HelloFailed(c) => (0, c as u16),
        ErrorType::BadRequest(c) => (1, c as u16),
        ErrorType::BadAction(c) => (2, c as u16),
        ErrorType::BadMatch(c) => (
            4,
            match c {
                BadMatch::BadLen => 1,
                BadMatch::BadField => 6,
                BadMatch::BadValue => 7,
                BadMatch::BadMask => 8,
                BadMatch::BadPrereq => 9,
                BadMatch::DupField => 10,
            },
        ),
        ErrorType::FlowModFailed(c) => (
            5,
            match c {
                FlowModFailed::Unsupported => 0,
                FlowModFailed::AllTablesFull => 1,
                FlowModFailed::Overlap => 3,
                FlowModFailed::EPerm => 4,
                FlowModFailed::BadEmergTimeout => 5,
                FlowModFailed::BadCommand => 6,
            },
        ),
        ErrorType::PortModFailed(c) => (7, c as u16),
        ErrorType::QueueOpFailed(c) => (9, c as u16),
    }
}

pub fn error_internal_code(typ: u16, code: u16) -> Result<ErrorType, OfpSerializationError> {
    let bad = || OfpSerializationError::UnexpectedValueError {
        value: format!("type {} code {}", typ, code),
        field: "error".to_string(),
        message: "error".to_string(),
    };
    Ok(match typ {
        0 => ErrorType::HelloFailed(match code {
            0 => HelloFailed::Incompatible,
            1 => HelloFailed::EPerm,
            _ => return Err(bad()),
        }),
        1 => ErrorType::BadRequest(match code {
            0 => BadRequest::BadVersion,
            1 => BadRequest::BadType,
            2 => BadRequest::BadStat,
            3 => BadRequest::BadVendor,
            4 => BadRequest::BadSubType,
            5 => BadRequest::EPerm,
            6 => BadRequest::BadLen,
            7 => BadRequest::BufferEmpty,
            8 => BadRequest::BufferUnknown,
            _ => return Err(bad()),
        }),
        2 => ErrorType::BadAction(match code {
            0 => BadAction::BadType,
            1 => BadAction::BadLen,
            2 => BadAction::BadVendor,
            3 => BadAction::BadVendorType,
            4 => BadAction::BadOutPort,
            5 => BadAction::BadArgument,
            6 => BadAction::EPerm,
            7 => BadAction::TooMany,
            8 => BadAction::BadQueue,
            _ => return Err(bad()),
        }),
        4 => ErrorType::BadMatch(match code {
            1 => BadMatch::BadLen,
            6 => BadMatch::BadField,
            7 => BadMatch::BadValue,
            8 => BadMatch::BadMask,
            9 => BadMatch::BadPrereq,
            10 => BadMatch::DupField,
            _ => return Err(bad()),
        }),
        5 => ErrorType::FlowModFailed(match code {
            0 => FlowModFailed::Unsupported,
            1 => FlowModFailed::AllTablesFull,
            3 => FlowModFailed::Overlap,
            4 => FlowModFailed::EPerm,
            5 => FlowModFailed::BadEmergTimeout,
            6 => FlowModFailed::BadCommand,
            _ => return Err(bad()),
        }),
        7 => ErrorType::PortModFailed(match code {
            0 => PortModFailed::BadPort,
            1 => PortModFailed::BadHwAddr,
            _ => return Err(bad()),
        }),
        9 => ErrorType::QueueOpFailed(match code {
            0 => QueueOpFailed::BadPort,
            1 => QueueOpFailed::BadQueue,
            2 => QueueOpFailed::EPerm,
            _ => return Err(bad()),
        }),
        _ => return Err(bad()),
    })
}

const OFP11_PORT_LENGTH: usize = 64;

pub struct PortDesc0x02;

impl PortDesc0x02 {
    pub fn size_of(_: &PortDesc) -> usize {
        OFP11_PORT_LENGTH
    }

    pub fn parse(bytes: &mut Cursor<Vec<u8>>) -> Result<PortDesc, OfpSerializationError> {
        let port_no = bytes.read_u32::<BigEndian>()?;
        bytes.consume(4);
        let mut mac = [0u8; 6];
        bytes.read_exact(&mut mac)?;
        bytes.consume(2);
        let name = read_fixed_size_string(bytes, 16)?;
        let config_word = bytes.read_u32::<BigEndian>()?;
        let state_word = bytes.read_u32::<BigEndian>()?;
        let curr = crate::openflow0x01::PortFeatures0x01::of_int(bytes.read_u32::<BigEndian>()?);
        let advertised =
            crate::openflow0x01::PortFeatures0x01::of_int(bytes.read_u32::<BigEndian>()?);
        let supported =
            crate::openflow0x01::PortFeatures0x01::of_int(bytes.read_u32::<BigEndian>()?);
        let peer = crate::openflow0x01::PortFeatures0x01::of_int(bytes.read_u32::<BigEndian>()?);
        bytes.consume(8); // curr_speed + max_speed
        Ok(PortDesc {
            port_no: port_no as u16,
            hw_addr: mac_of_bytes(mac),
            name,
            config: PortConfig {
                down: test_bit(0, config_word as u64),
                no_stp: false,
                no_recv: test_bit(2, config_word as u64),
                no_recv_stp: false,
                no_flood: false,
                no_fwd: test_bit(5, config_word as u64),
                no_packet_in: test_bit(6, config_word as u64),
            },
            state: PortState {
                down: test_bit(0, state_word as u64),
                stp_state: StpState::Forward,
            },
            curr,
            advertised,
            supported,
            peer,
        })
    }

    pub fn marshal(pd: &PortDesc, bytes: &mut Vec<u8>) {
        bytes.write_u32::<BigEndian>(pd.port_no as u32).unwrap();
        write_padding_bytes(bytes, 4);
        bytes.extend_from_slice(&bytes_of_mac(pd.hw_addr));
        write_padding_bytes(bytes, 2);
        write_fixed_size_string(bytes, &pd.name, 16);
        let config = bit(0, 0u64, pd.config.down);
        let config = bit(2, config, pd.config.no_recv);
        let config = bit(5, config, pd.config.no_fwd);
        let config = bit(6, config, pd.config.no_packet_in);
        bytes.write_u32::<BigEndian>(config as u32).unwrap();
        let state = bit(0, 0u64, pd.state.down);
        bytes.write_u32::<BigEndian>(state as u32).unwrap();
        bytes
            .write_u32::<BigEndian>(crate::openflow0x01::PortFeatures0x01::to_int(&pd.curr))
            .unwrap();
        bytes
            .write_u32::<BigEndian>(crate::openflow0x01::PortFeatures0x01::to_int(&pd.advertised))
            .unwrap();
        bytes
            .write_u32::<BigEndian>(crate::openflow0x01::PortFeatures0x01::to_int(&pd.supported))
            .unwrap();
        bytes
            .write_u32::<BigEndian>(crate::openflow0x01::PortFeatures0x01::to_int(&pd.peer))
            .unwrap();
        write_padding_bytes(bytes, 8);
    }
}

pub mod message {
    use super::*;

    pub struct Message0x02 {
        inner: Message,
    }

    impl From<Message> for Message0x02 {
        fn from(m: Message) -> Self {
            Message0x02 { inner: m }
        }
    }

    impl Message0x02 {
        pub fn message(self) -> Message {
            self.inner
        }

        fn msg_code_to_u8(code: &MsgCode) -> Result<u8, OfpSerializationError> {
            // The 1.1 numbering inserts GROUP_MOD at 15 and TABLE_MOD at 17.
            let v = match code {
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
            };
            Ok(v)
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
                7 => MsgCode::GetConfigReq,
                8 => MsgCode::GetConfigResp,
                9 => MsgCode::SetConfig,
                10 => MsgCode::PacketIn,
                11 => MsgCode::FlowRemoved,
                12 => MsgCode::PortStatus,
                13 => MsgCode::PacketOut,
                14 => MsgCode::FlowMod,
                16 => MsgCode::PortMod,
                18 => MsgCode::StatsReq,
                19 => MsgCode::StatsResp,
                20 => MsgCode::BarrierReq,
                21 => MsgCode::BarrierResp,
                22 => MsgCode::QueueGetConfigReq,
                23 => MsgCode::QueueGetConfigResp,
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

        fn unimplemented(feature: &str) -> OfpSerializationError {
            OfpSerializationError::UnimplementedFeatureInVersion {
                version: OPENFLOW_0_02_VERSION,
                feature: feature.to_string(),
            }
        }

        fn body_size(msg: &Message) -> usize {
            match msg {
                Message::Hello => 0,
                Message::Error(Error::Error(_, body)) => 4 + body.len(),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => buf.len(),
                Message::FeaturesReq => 0,
                Message::FeaturesReply(sf) => {
                    24 + sf.ports.as_ref().map_or(0, |p| p.len() * OFP11_PORT_LENGTH)
                }
                Message::FlowMod(fm) => FlowMod::size_of(fm),
                Message::PacketIn(pi) => 16 + Payload::size_of(&pi.input_payload),
                Message::PacketOut(po) => {
                    16 + Action0x02::size_of_sequence(&po.apply_actions)
                        + Payload::size_of(&po.output_payload)
                }
                Message::FlowRemoved(fr) => 40 + Pattern0x02::size_of(&fr.pattern),
                Message::PortStatus(_) => 8 + OFP11_PORT_LENGTH,
                Message::BarrierRequest | Message::BarrierReply => 0,
                _ => 0,
            }
        }

        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
            match msg {
                Message::Hello => Ok(()),
                Message::Error(Error::Error(et, body)) => {
                    let (typ, code) = error_wire_code(&et);
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
                    let caps = bit(7, caps, c.arp_match_ip);
                    bytes.write_u32::<BigEndian>(caps as u32).unwrap();
                    bytes.write_u32::<BigEndian>(0).unwrap(); // reserved
                    if let Some(ports) = sf.ports {
                        for pd in ports {
                            PortDesc0x02::marshal(&pd, bytes);
                        }
                    }
                    Ok(())
                }
                Message::FlowMod(fm) => FlowMod::marshal(fm, bytes),
                Message::PacketIn(pi) => {
                    bytes
                        .write_i32::<BigEndian>(match pi.input_payload {
                            Payload::Buffered(n, _) => n as i32,
                            Payload::NotBuffered(_) => -1,
                        })
                        .unwrap();
                    bytes.write_u32::<BigEndian>(pi.port as u32).unwrap();
                    bytes.write_u32::<BigEndian>(pi.port as u32).unwrap();
                    bytes.write_u16::<BigEndian>(pi.total_len).unwrap();
                    bytes.write_u8(pi.reason as u8).unwrap();
                    bytes.write_u8(0).unwrap(); // table id
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
                            Action0x02::size_of_sequence(&po.apply_actions) as u16
                        )
                        .unwrap();
                    write_padding_bytes(bytes, 6);
                    for act in po.apply_actions {
                        Action0x02::marshal(act, bytes)?;
                    }
                    bytes.extend_from_slice(po.output_payload.bytes());
                    Ok(())
                }
                Message::FlowRemoved(fr) => {
                    bytes.write_u64::<BigEndian>(fr.cookie).unwrap();
                    bytes.write_u16::<BigEndian>(fr.priority).unwrap();
                    bytes.write_u8(fr.reason as u8).unwrap();
                    bytes.write_u8(0).unwrap(); // table id
                    bytes.write_u32::<BigEndian>(fr.duration_sec).unwrap();
                    bytes.write_u32::<BigEndian>(fr.duration_nsec).unwrap();
                    bytes
                        .write_u16::<BigEndian>(Timeout::to_int(fr.idle_timeout))
                        .unwrap();
                    write_padding_bytes(bytes, 2);
                    bytes.write_u64::<BigEndian>(fr.packet_count).unwrap();
                    bytes.write_u64::<BigEndian>(fr.byte_count).unwrap();
                    Pattern0x02::marshal(fr.pattern, bytes)
                }
                Message::PortStatus(ps) => {
                    bytes.write_u8(ps.reason as u8).unwrap();
                    write_padding_bytes(bytes, 7);
                    PortDesc0x02::marshal(&ps.desc, bytes);
                    Ok(())
                }
                Message::BarrierRequest | Message::BarrierReply => Ok(()),
                other => Err(Self::unimplemented(&format!("marshaling {:?}", other))),
            }
        }
    }

    impl OfpMessage for Message0x02 {
        fn size_of(msg: &Message0x02) -> usize {
            OfpHeader::size() + Message0x02::body_size(&msg.inner)
        }

        fn header_of(xid: u32, msg: &Message0x02) -> Result<OfpHeader, OfpSerializationError> {
            Ok(OfpHeader::new(
                OPENFLOW_0_02_VERSION,
                Self::msg_code_to_u8(&Self::msg_code_of_message(&msg.inner))?,
                Self::size_of(msg) as u16,
                xid,
            ))
        }

        fn marshal(xid: u32, msg: Message0x02) -> Result<Vec<u8>, OfpSerializationError> {
            let hdr = Self::header_of(xid, &msg)?;
            let mut bytes = vec![];
            OfpHeader::marshal(&mut bytes, hdr);
            Message0x02::marshal_body(msg.inner, &mut bytes)?;
            Ok(bytes)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message0x02), OfpSerializationError> {
            let code = Self::msg_code_of_u8(header.type_byte())?;
            let inner = match code {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => {
                    let mut bytes = Cursor::new(buf.to_vec());
                    let typ = bytes.read_u16::<BigEndian>()?;
                    let error_code = bytes.read_u16::<BigEndian>()?;
                    let et = error_internal_code(typ, error_code)?;
                    Message::Error(Error::Error(et, bytes.fill_buf()?.to_vec()))
                }
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::PacketIn => {
                    let mut bytes = Cursor::new(buf.to_vec());
                    let buf_id = bytes.read_i32::<BigEndian>()?;
                    let in_port = bytes.read_u32::<BigEndian>()?;
                    let _in_phy_port = bytes.read_u32::<BigEndian>()?;
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
                    let data = bytes.fill_buf()?.to_vec();
                    Message::PacketIn(PacketIn {
                        input_payload: match buf_id {
                            -1 => Payload::NotBuffered(data),
                            n => Payload::Buffered(n as u32, data),
                        },
                        total_len,
                        port: in_port as u16,
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
                    let actions = Action0x02::parse_sequence(&mut cursor)?;
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
                    let pattern = Pattern0x02::parse(&mut bytes)?;
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
                        version: OPENFLOW_0_02_VERSION,
                        code,
                    })
                }
            };
            Ok((header.xid(), Message0x02 { inner }))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const TEST_XID: u32 = 0xabcd;

        fn roundtrip(message: Message) -> Message {
            let data = Message0x02::marshal(TEST_XID, Message0x02::from(message)).unwrap();
            let header = OfpHeader::parse(&data[..OfpHeader::size()]).unwrap();
            assert_eq!(header.version(), OPENFLOW_0_02_VERSION);
            assert_eq!(header.length(), data.len());
            let (_, msg) = Message0x02::parse(&header, &data[OfpHeader::size()..]).unwrap();
            msg.inner
        }

        fn pattern() -> Pattern {
            let mut p = Pattern::match_all();
            p.in_port = Some(7);
            p.dl_typ = Some(0x0800);
            p.nw_proto = Some(17);
            p.nw_src = Some(Mask::masked(0x0a000000, 8));
            p.tp_dst = Some(53);
            p
        }

        fn flow_mod(actions: Vec<Action>, write_start: Option<usize>) -> FlowMod {
            FlowMod {
                table: TableId(1),
                command: FlowModCmd::AddFlow,
                pattern: pattern(),
                priority: 500,
                actions,
                write_start,
                cookie: 0xfeedface,
                cookie_mask: 0,
                idle_timeout: Timeout::ExpiresAfter(30),
                hard_timeout: Timeout::Permanent,
                notify_when_removed: true,
                apply_to_packet: None,
                out_port: None,
                check_overlap: false,
                emergency: false,
            }
        }

        #[test]
        fn flow_mod_apply_actions_roundtrip() {
            let fm = flow_mod(
                vec![
                    Action::SetNwTos(0x10),
                    Action::Output(PseudoPort::PhysicalPort(2)),
                ],
                None,
            );
            let msg = Message::FlowMod(fm);
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn flow_mod_write_actions_roundtrip() {
            let fm = flow_mod(
                vec![
                    Action::SetDlVlan(Some(5)),
                    Action::Output(PseudoPort::PhysicalPort(2)),
                    Action::Output(PseudoPort::PhysicalPort(3)),
                    Action::GotoTable(2),
                ],
                Some(2),
            );
            let msg = Message::FlowMod(fm);
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn flow_mod_instruction_wire_format() {
            let fm = flow_mod(vec![Action::Output(PseudoPort::PhysicalPort(1))], None);
            let data = Message0x02::marshal(TEST_XID, Message0x02::from(Message::FlowMod(fm)))
                .unwrap();
            // apply-actions instruction follows the 88-byte match
            let instr_off = 8 + 40 + 88;
            assert_eq!(data[instr_off], 0);
            assert_eq!(data[instr_off + 1], OFPIT_APPLY_ACTIONS as u8);
            assert_eq!(data[instr_off + 3], 8 + 16);
        }

        #[test]
        fn mpls_match_roundtrip() {
            let mut p = Pattern::match_all();
            p.dl_typ = Some(0x8847);
            p.mpls_label = Some(42);
            p.mpls_tc = Some(3);
            let fm = flow_mod(vec![Action::DecMplsTtl], None);
            let msg = Message::FlowMod(FlowMod { pattern: p, ..fm });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn packet_in_roundtrip() {
            let msg = Message::PacketIn(PacketIn {
                input_payload: Payload::NotBuffered(vec![9, 9, 9]),
                total_len: 3,
                port: 4,
                reason: PacketInReason::NoMatch,
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn flow_removed_roundtrip() {
            let msg = Message::FlowRemoved(FlowRemoved {
                pattern: pattern(),
                cookie: 1,
                priority: 2,
                reason: FlowRemovedReason::Delete,
                duration_sec: 3,
                duration_nsec: 4,
                idle_timeout: Timeout::Permanent,
                packet_count: 5,
                byte_count: 6,
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn error_roundtrip_uses_native_bad_match_type() {
            let msg = Message::Error(Error::Error(
                ErrorType::BadMatch(BadMatch::BadPrereq),
                vec![1, 2, 3],
            ));
            let data = Message0x02::marshal(TEST_XID, Message0x02::from(msg.clone())).unwrap();
            assert_eq!(data[8], 0);
            assert_eq!(data[9], 4); // OFPET_BAD_MATCH
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn stats_are_not_implemented_in_this_dialect() {
            let msg = Message::StatsRequest(StatsReq {
                req_type: StatsReqType::Desc,
                flags: 0,
                body: StatsReqBody::DescBody,
            });
            assert!(Message0x02::marshal(TEST_XID, Message0x02::from(msg)).is_err());
        }
    }
}
