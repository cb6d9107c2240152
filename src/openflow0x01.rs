//! OpenFlow 1.0 wire dialect.
//!
//! Complete codec between the internal message model and the 1.0 byte
//! layouts, including the fixed 40-byte match structure and the standard
//! action set. Nicira vendor actions and vendor messages are delegated to
//! the `nicira` module.

use std::io::{BufRead, Cursor, Read};
use std::mem::size_of;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Buf;

use crate::bits::*;
use crate::message::*;
use crate::nicira;
use crate::ofp_message::{ActionEntryError, OfpSerializationError};
use crate::ofp_utils::{read_fixed_size_string, write_fixed_size_string, write_padding_bytes};
use crate::packet::{bytes_of_mac, mac_of_bytes};

const OFP_MAX_TABLE_NAME_LENGTH: usize = 32;
const DESC_STR_LENGTH: usize = 256;
const SERIAL_NUM_LENGTH: usize = 32;

pub const ALL_TABLES: u8 = 0xff;

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType {
    /// Return the byte-size of a message.
    fn size_of(msg: &Self) -> usize;
    /// Parse a buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self, OfpSerializationError>
    where
        Self: Sized;
    /// Marshal a message into a `u8` buffer.
    fn marshal(msg: Self, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError>;
}

pub struct Wildcards0x01;

impl Wildcards0x01 {
    fn set_nw_mask(f: u32, offset: usize, v: u32) -> u32 {
        let value = (0x3f & v) << offset;
        f | value
    }

    fn get_nw_mask(f: u32, offset: usize) -> u32 {
        (f >> offset) & 0x3f
    }

    pub fn marshal(w: Wildcards, bytes: &mut Vec<u8>) {
        let ret = 0u32;
        let ret = bit(0, ret as u64, w.in_port) as u32;
        let ret = bit(1, ret as u64, w.dl_vlan) as u32;
        let ret = bit(2, ret as u64, w.dl_src) as u32;
        let ret = bit(3, ret as u64, w.dl_dst) as u32;
        let ret = bit(4, ret as u64, w.dl_type) as u32;
        let ret = bit(5, ret as u64, w.nw_proto) as u32;
        let ret = bit(6, ret as u64, w.tp_src) as u32;
        let ret = bit(7, ret as u64, w.tp_dst) as u32;
        let ret = Wildcards0x01::set_nw_mask(ret, 8, w.nw_src);
        let ret = Wildcards0x01::set_nw_mask(ret, 14, w.nw_dst);
        let ret = bit(20, ret as u64, w.dl_vlan_pcp) as u32;
        let ret = bit(21, ret as u64, w.nw_tos) as u32;
        bytes.write_u32::<BigEndian>(ret).unwrap()
    }

    pub fn parse(bits: u32) -> Wildcards {
        Wildcards {
            in_port: test_bit(0, bits as u64),
            dl_vlan: test_bit(1, bits as u64),
            dl_src: test_bit(2, bits as u64),
            dl_dst: test_bit(3, bits as u64),
            dl_type: test_bit(4, bits as u64),
            nw_proto: test_bit(5, bits as u64),
            tp_src: test_bit(6, bits as u64),
            tp_dst: test_bit(7, bits as u64),
            nw_src: Wildcards0x01::get_nw_mask(bits, 8),
            nw_dst: Wildcards0x01::get_nw_mask(bits, 14),
            dl_vlan_pcp: test_bit(20, bits as u64),
            nw_tos: test_bit(21, bits as u64),
        }
    }
}

pub struct Pattern0x01;

impl Pattern0x01 {
    pub fn size_of(_: &Pattern) -> usize {
        size_of::<OfpMatch>()
    }

    pub fn parse(bytes: &mut Cursor<Vec<u8>>) -> Result<Pattern, OfpSerializationError> {
        let w = Wildcards0x01::parse(bytes.read_u32::<BigEndian>()?);
        let mut pattern = Pattern::match_all();
        pattern.in_port = if w.in_port {
            bytes.consume(2);
            None
        } else {
            Some(bytes.read_u16::<BigEndian>()?)
        };
        pattern.dl_src = if w.dl_src {
            bytes.consume(6);
            None
        } else {
            let mut arr: [u8; 6] = [0; 6];
            bytes.read_exact(&mut arr)?;
            Some(mac_of_bytes(arr))
        };
        pattern.dl_dst = if w.dl_dst {
            bytes.consume(6);
            None
        } else {
            let mut arr: [u8; 6] = [0; 6];
            bytes.read_exact(&mut arr)?;
            Some(mac_of_bytes(arr))
        };
        pattern.dl_vlan = if w.dl_vlan {
            bytes.consume(2);
            None
        } else {
            let vlan = bytes.read_u16::<BigEndian>()?;
            if vlan == 0xffff {
                Some(None)
            } else {
                Some(Some(vlan))
            }
        };
        pattern.dl_vlan_pcp = if w.dl_vlan_pcp {
            bytes.consume(1);
            None
        } else {
            Some(bytes.read_u8()?)
        };
        bytes.consume(1);
        pattern.dl_typ = if w.dl_type {
            bytes.consume(2);
            None
        } else {
            Some(bytes.read_u16::<BigEndian>()?)
        };
        pattern.nw_tos = if w.nw_tos {
            bytes.consume(1);
            None
        } else {
            Some(bytes.read_u8()?)
        };
        pattern.nw_proto = if w.nw_proto {
            bytes.consume(1);
            None
        } else {
            Some(bytes.read_u8()?)
        };
        bytes.consume(2);
        pattern.nw_src = Self::parse_nw(bytes, w.nw_src)?;
        pattern.nw_dst = Self::parse_nw(bytes, w.nw_dst)?;
        pattern.tp_src = if w.tp_src {
            bytes.consume(2);
            None
        } else {
            Some(bytes.read_u16::<BigEndian>()?)
        };
        pattern.tp_dst = if w.tp_dst {
            bytes.consume(2);
            None
        } else {
            Some(bytes.read_u16::<BigEndian>()?)
        };
        Ok(pattern)
    }

    fn parse_nw(
        bytes: &mut Cursor<Vec<u8>>,
        wild_bits: u32,
    ) -> Result<Option<Mask<u32>>, OfpSerializationError> {
        if wild_bits >= 32 {
            bytes.consume(4);
            Ok(None)
        } else if wild_bits == 0 {
            Ok(Some(Mask {
                value: bytes.read_u32::<BigEndian>()?,
                mask: None,
            }))
        } else {
            Ok(Some(Mask {
                value: bytes.read_u32::<BigEndian>()?,
                mask: Some(wild_bits),
            }))
        }
    }

    pub fn marshal(p: Pattern, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        if p.requires_extended_match() {
            return Err(OfpSerializationError::UnimplementedFeatureInVersion {
                version: crate::ofp_header::OPENFLOW_0_01_VERSION,
                feature: "extended match fields".to_string(),
            });
        }
        let w = Pattern::wildcards_of_pattern(&p);
        Wildcards0x01::marshal(w, bytes);
        bytes.write_u16::<BigEndian>(p.in_port.unwrap_or(0)).unwrap();
        bytes.extend_from_slice(&bytes_of_mac(p.dl_src.unwrap_or(0)));
        bytes.extend_from_slice(&bytes_of_mac(p.dl_dst.unwrap_or(0)));
        let vlan = match p.dl_vlan {
            Some(Some(v)) => v,
            Some(None) => 0xffff,
            None => 0xffff,
        };
        bytes.write_u16::<BigEndian>(vlan).unwrap();
        bytes.write_u8(p.dl_vlan_pcp.unwrap_or(0)).unwrap();
        bytes.write_u8(0).unwrap();
        bytes.write_u16::<BigEndian>(p.dl_typ.unwrap_or(0)).unwrap();
        bytes.write_u8(p.nw_tos.unwrap_or(0)).unwrap();
        bytes.write_u8(p.nw_proto.unwrap_or(0)).unwrap();
        bytes.write_u16::<BigEndian>(0).unwrap();
        bytes
            .write_u32::<BigEndian>(p.nw_src.map(|m| m.value).unwrap_or(0))
            .unwrap();
        bytes
            .write_u32::<BigEndian>(p.nw_dst.map(|m| m.value).unwrap_or(0))
            .unwrap();
        bytes.write_u16::<BigEndian>(p.tp_src.unwrap_or(0)).unwrap();
        bytes.write_u16::<BigEndian>(p.tp_dst.unwrap_or(0)).unwrap();
        Ok(())
    }
}

#[repr(packed)]
struct OfpMatch(u32, u16, [u8; 6], [u8; 6], u16, u8, u8, u16, u8, u8, u16, u32, u32, u16, u16);

#[repr(u16)]
pub enum OfpPort {
    OFPPMax = 0xff00,
    OFPPInPort = 0xfff8,
    OFPPTable = 0xfff9,
    OFPPNormal = 0xfffa,
    OFPPFlood = 0xfffb,
    OFPPAll = 0xfffc,
    OFPPController = 0xfffd,
    OFPPLocal = 0xfffe,
    OFPPNone = 0xffff,
}

pub struct PseudoPort0x01;

impl PseudoPort0x01 {
    pub fn of_int(p: u16) -> Result<Option<PseudoPort>, OfpSerializationError> {
        if (OfpPort::OFPPNone as u16) == p {
            Ok(None)
        } else {
            Ok(Some(PseudoPort0x01::make(p, 0)?))
        }
    }

    pub fn make(p: u16, len: u64) -> Result<PseudoPort, OfpSerializationError> {
        let res = match p {
            p if p == (OfpPort::OFPPInPort as u16) => PseudoPort::InPort,
            p if p == (OfpPort::OFPPTable as u16) => PseudoPort::Table,
            p if p == (OfpPort::OFPPNormal as u16) => PseudoPort::Normal,
            p if p == (OfpPort::OFPPFlood as u16) => PseudoPort::Flood,
            p if p == (OfpPort::OFPPAll as u16) => PseudoPort::AllPorts,
            p if p == (OfpPort::OFPPController as u16) => PseudoPort::Controller(len),
            p if p == (OfpPort::OFPPLocal as u16) => PseudoPort::Local,
            _ => {
                if p <= (OfpPort::OFPPMax as u16) {
                    PseudoPort::PhysicalPort(p)
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
        match pp {
            PseudoPort::PhysicalPort(p) => bytes.write_u16::<BigEndian>(p).unwrap(),
            PseudoPort::InPort => bytes.write_u16::<BigEndian>(OfpPort::OFPPInPort as u16).unwrap(),
            PseudoPort::Table => bytes.write_u16::<BigEndian>(OfpPort::OFPPTable as u16).unwrap(),
            PseudoPort::Normal => bytes.write_u16::<BigEndian>(OfpPort::OFPPNormal as u16).unwrap(),
            PseudoPort::Flood => bytes.write_u16::<BigEndian>(OfpPort::OFPPFlood as u16).unwrap(),
            PseudoPort::AllPorts => bytes.write_u16::<BigEndian>(OfpPort::OFPPAll as u16).unwrap(),
            PseudoPort::Controller(_) => {
                bytes.write_u16::<BigEndian>(OfpPort::OFPPController as u16).unwrap()
            }
            PseudoPort::Local => bytes.write_u16::<BigEndian>(OfpPort::OFPPLocal as u16).unwrap(),
        }
    }
}

#[repr(packed)]
struct OfpActionHeader(u16, u16);

#[repr(packed)]
struct OfpActionOutput(u16, u16);
#[repr(packed)]
struct OfpActionVlanVId(u16, u16);
#[repr(packed)]
struct OfpActionVlanPcp(u8, [u8; 3]);
#[repr(packed)]
struct OfpActionStripVlan(u32);
#[repr(packed)]
struct OfpActionDlAddr([u8; 6], [u8; 6]);
#[repr(packed)]
struct OfpActionNwAddr(u32);
#[repr(packed)]
struct OfpActionTpPort(u16, u16);
#[repr(packed)]
struct OfpActionNwTos(u8, [u8; 3]);
#[repr(packed)]
struct OfpActionEnqueue(u16, [u8; 6], u32);

#[repr(u16)]
enum OfpActionType {
    OFPATOutput,
    OFPATSetVlanVId,
    OFPATSetVlanPCP,
    OFPATStripVlan,
    OFPATSetDlSrc,
    OFPATSetDlDst,
    OFPATSetNwSrc,
    OFPATSetNwDst,
    OFPATSetNwTos,
    OFPATSetTpSrc,
    OFPATSetTpDst,
    OFPATEnqueue,
    OFPATVendor = 0xffff,
}

pub struct Action0x01;

impl Action0x01 {
    fn is_standard(a: &Action) -> bool {
        matches!(
            *a,
            Action::Output(_)
                | Action::SetDlVlan(_)
                | Action::SetDlVlanPcp(_)
                | Action::SetDlSrc(_)
                | Action::SetDlDst(_)
                | Action::SetNwSrc(_)
                | Action::SetNwDst(_)
                | Action::SetNwTos(_)
                | Action::SetTpSrc(_)
                | Action::SetTpDst(_)
                | Action::Enqueue(_, _)
        )
    }

    fn type_code(a: &Action) -> OfpActionType {
        match *a {
            Action::Output(_) => OfpActionType::OFPATOutput,
            Action::SetDlVlan(None) => OfpActionType::OFPATStripVlan,
            Action::SetDlVlan(Some(_)) => OfpActionType::OFPATSetVlanVId,
            Action::SetDlVlanPcp(_) => OfpActionType::OFPATSetVlanPCP,
            Action::SetDlSrc(_) => OfpActionType::OFPATSetDlSrc,
            Action::SetDlDst(_) => OfpActionType::OFPATSetDlDst,
            Action::SetNwSrc(_) => OfpActionType::OFPATSetNwSrc,
            Action::SetNwDst(_) => OfpActionType::OFPATSetNwDst,
            Action::SetNwTos(_) => OfpActionType::OFPATSetNwTos,
            Action::SetTpSrc(_) => OfpActionType::OFPATSetTpSrc,
            Action::SetTpDst(_) => OfpActionType::OFPATSetTpDst,
            Action::Enqueue(_, _) => OfpActionType::OFPATEnqueue,
            _ => OfpActionType::OFPATVendor,
        }
    }

    pub fn size_of(a: &Action) -> usize {
        let h = size_of::<OfpActionHeader>();
        match *a {
            Action::Output(_) => h + size_of::<OfpActionOutput>(),
            Action::SetDlVlan(None) => h + size_of::<OfpActionStripVlan>(),
            Action::SetDlVlan(Some(_)) => h + size_of::<OfpActionVlanVId>(),
            Action::SetDlVlanPcp(_) => h + size_of::<OfpActionVlanPcp>(),
            Action::SetDlSrc(_) | Action::SetDlDst(_) => h + size_of::<OfpActionDlAddr>(),
            Action::SetNwSrc(_) | Action::SetNwDst(_) => h + size_of::<OfpActionNwAddr>(),
            Action::SetNwTos(_) => h + size_of::<OfpActionNwTos>(),
            Action::SetTpSrc(_) | Action::SetTpDst(_) => h + size_of::<OfpActionTpPort>(),
            Action::Enqueue(_, _) => h + size_of::<OfpActionEnqueue>(),
            ref nx => nicira::nx_action_size(nx),
        }
    }

    pub fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().fold(0, |acc, x| Action0x01::size_of(x) + acc)
    }

    fn parse_one(bytes: &mut Cursor<Vec<u8>>) -> Result<Action, OfpSerializationError> {
        if bytes.remaining() < size_of::<OfpActionHeader>() {
            return Err(OfpSerializationError::BadActionEntry {
                kind: ActionEntryError::BadLength,
                detail: "truncated action header".to_string(),
            });
        }
        let action_code = bytes.read_u16::<BigEndian>()?;
        let length = bytes.read_u16::<BigEndian>()? as usize;
        if length < size_of::<OfpActionHeader>() || length % 8 != 0 {
            return Err(OfpSerializationError::BadActionEntry {
                kind: ActionEntryError::BadLength,
                detail: format!("action length {}", length),
            });
        }
        let body_len = length - size_of::<OfpActionHeader>();
        if bytes.remaining() < body_len {
            return Err(OfpSerializationError::BadActionEntry {
                kind: ActionEntryError::BadLength,
                detail: "action overruns message".to_string(),
            });
        }
        let action = match action_code {
            t if t == (OfpActionType::OFPATOutput as u16) => {
                let port_code = bytes.read_u16::<BigEndian>()?;
                let len = bytes.read_u16::<BigEndian>()?;
                Action::Output(PseudoPort0x01::make(port_code, len as u64)?)
            }
            t if t == (OfpActionType::OFPATSetVlanVId as u16) => {
                let vid = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                if vid == 0xffff {
                    Action::SetDlVlan(None)
                } else {
                    Action::SetDlVlan(Some(vid))
                }
            }
            t if t == (OfpActionType::OFPATSetVlanPCP as u16) => {
                let pcp = bytes.read_u8()?;
                bytes.consume(3);
                Action::SetDlVlanPcp(pcp)
            }
            t if t == (OfpActionType::OFPATStripVlan as u16) => {
                bytes.consume(4);
                Action::SetDlVlan(None)
            }
            t if t == (OfpActionType::OFPATSetDlSrc as u16) => {
                let mut dl_addr: [u8; 6] = [0; 6];
                bytes.read_exact(&mut dl_addr)?;
                bytes.consume(6);
                Action::SetDlSrc(mac_of_bytes(dl_addr))
            }
            t if t == (OfpActionType::OFPATSetDlDst as u16) => {
                let mut dl_addr: [u8; 6] = [0; 6];
                bytes.read_exact(&mut dl_addr)?;
                bytes.consume(6);
                Action::SetDlDst(mac_of_bytes(dl_addr))
            }
            t if t == (OfpActionType::OFPATSetNwSrc as u16) => {
                Action::SetNwSrc(bytes.read_u32::<BigEndian>()?)
            }
            t if t == (OfpActionType::OFPATSetNwDst as u16) => {
                Action::SetNwDst(bytes.read_u32::<BigEndian>()?)
            }
            t if t == (OfpActionType::OFPATSetNwTos as u16) => {
                let nw_tos = bytes.read_u8()?;
                bytes.consume(3);
                Action::SetNwTos(nw_tos)
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
            t if t == (OfpActionType::OFPATEnqueue as u16) => {
                let pt = bytes.read_u16::<BigEndian>()?;
                bytes.consume(6);
                let qid = bytes.read_u32::<BigEndian>()?;
                Action::Enqueue(PseudoPort0x01::make(pt, 0)?, qid)
            }
            t if t == (OfpActionType::OFPATVendor as u16) => {
                nicira::parse_nx_action(bytes, body_len)?
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
            v.push(Action0x01::parse_one(bytes)?);
        }
        Ok(v)
    }

    fn move_controller_last(acts: Vec<Action>) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts
            .into_iter()
            .partition(|act| matches!(*act, Action::Output(PseudoPort::Controller(_))));
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    pub fn marshal(act: Action, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        if !Self::is_standard(&act) {
            return nicira::marshal_nx_action(act, bytes);
        }
        bytes
            .write_u16::<BigEndian>(Action0x01::type_code(&act) as u16)
            .unwrap();
        bytes
            .write_u16::<BigEndian>(Action0x01::size_of(&act) as u16)
            .unwrap();
        match act {
            Action::Output(pp) => {
                PseudoPort0x01::marshal(pp, bytes);
                bytes
                    .write_u16::<BigEndian>(match pp {
                        PseudoPort::Controller(w) => w as u16,
                        _ => 0,
                    })
                    .unwrap()
            }
            Action::SetDlVlan(None) => bytes.write_u32::<BigEndian>(0xffff).unwrap(),
            Action::SetDlVlan(Some(vid)) => {
                bytes.write_u16::<BigEndian>(vid).unwrap();
                bytes.write_u16::<BigEndian>(0).unwrap();
            }
            Action::SetDlVlanPcp(n) => {
                bytes.write_u8(n).unwrap();
                write_padding_bytes(bytes, 3);
            }
            Action::SetDlSrc(mac) | Action::SetDlDst(mac) => {
                bytes.extend_from_slice(&bytes_of_mac(mac));
                write_padding_bytes(bytes, 6);
            }
            Action::SetNwSrc(addr) | Action::SetNwDst(addr) => {
                bytes.write_u32::<BigEndian>(addr).unwrap()
            }
            Action::SetNwTos(n) => {
                bytes.write_u8(n).unwrap();
                write_padding_bytes(bytes, 3);
            }
            Action::SetTpSrc(pt) | Action::SetTpDst(pt) => {
                bytes.write_u16::<BigEndian>(pt).unwrap();
                bytes.write_u16::<BigEndian>(0).unwrap();
            }
            Action::Enqueue(pp, qid) => {
                PseudoPort0x01::marshal(pp, bytes);
                write_padding_bytes(bytes, 6);
                bytes.write_u32::<BigEndian>(qid).unwrap();
            }
            _ => unreachable!("non-standard action"),
        }
        Ok(())
    }

    pub fn marshal_sequence(
        actions: Vec<Action>,
        bytes: &mut Vec<u8>,
    ) -> Result<(), OfpSerializationError> {
        for act in Action0x01::move_controller_last(actions) {
            if let Action::Output(PseudoPort::Table) = act {
                return Err(OfpSerializationError::BadActionEntry {
                    kind: ActionEntryError::BadOutPort,
                    detail: "OFPP_TABLE not allowed in installed flow".to_string(),
                });
            }
            Action0x01::marshal(act, bytes)?;
        }
        Ok(())
    }
}

#[repr(packed)]
struct OfpSwitchFeatures(u64, u32, u8, [u8; 3], u32, u32);

impl MessageType for SwitchFeatures {
    fn size_of(sf: &SwitchFeatures) -> usize {
        let pds: usize = match &sf.ports {
            Some(ports) => ports.iter().map(PortDesc0x01::size_of).sum(),
            None => 0,
        };
        size_of::<OfpSwitchFeatures>() + pds
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        bytes.consume(3);
        let supported_capabilities = {
            let d = bytes.read_u32::<BigEndian>()?;
            Capabilities {
                flow_stats: test_bit(0, d as u64),
                table_stats: test_bit(1, d as u64),
                port_stats: test_bit(2, d as u64),
                stp: test_bit(3, d as u64),
                ip_reasm: test_bit(5, d as u64),
                queue_stats: test_bit(6, d as u64),
                arp_match_ip: test_bit(7, d as u64),
            }
        };
        let supported_actions = {
            let d = bytes.read_u32::<BigEndian>()?;
            SupportedActions {
                output: test_bit(0, d as u64),
                set_vlan_id: test_bit(1, d as u64),
                set_vlan_pcp: test_bit(2, d as u64),
                strip_vlan: test_bit(3, d as u64),
                set_dl_src: test_bit(4, d as u64),
                set_dl_dst: test_bit(5, d as u64),
                set_nw_src: test_bit(6, d as u64),
                set_nw_dst: test_bit(7, d as u64),
                set_nw_tos: test_bit(8, d as u64),
                set_tp_src: test_bit(9, d as u64),
                set_tp_dst: test_bit(10, d as u64),
                enqueue: test_bit(11, d as u64),
                vendor: test_bit(12, d as u64),
            }
        };
        let ports = {
            let mut v = vec![];
            let pos = bytes.position() as usize;
            let rem = bytes.get_ref().len() - pos;
            let num_ports = rem / size_of::<OfpPhyPort>();
            for _ in 0..num_ports {
                v.push(PortDesc0x01::parse(&mut bytes)?)
            }
            v
        };
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            supported_capabilities,
            supported_actions: Some(supported_actions),
            ports: Some(ports),
        })
    }

    fn marshal(sf: SwitchFeatures, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u64::<BigEndian>(sf.datapath_id).unwrap();
        bytes.write_u32::<BigEndian>(sf.num_buffers).unwrap();
        bytes.write_u8(sf.num_tables).unwrap();
        write_padding_bytes(bytes, 3);
        let c = sf.supported_capabilities;
        let caps = 0u64;
        let caps = bit(0, caps, c.flow_stats);
        let caps = bit(1, caps, c.table_stats);
        let caps = bit(2, caps, c.port_stats);
        let caps = bit(3, caps, c.stp);
        let caps = bit(5, caps, c.ip_reasm);
        let caps = bit(6, caps, c.queue_stats);
        let caps = bit(7, caps, c.arp_match_ip);
        bytes.write_u32::<BigEndian>(caps as u32).unwrap();
        let acts = match sf.supported_actions {
            None => 0u64,
            Some(a) => {
                let v = 0u64;
                let v = bit(0, v, a.output);
                let v = bit(1, v, a.set_vlan_id);
                let v = bit(2, v, a.set_vlan_pcp);
                let v = bit(3, v, a.strip_vlan);
                let v = bit(4, v, a.set_dl_src);
                let v = bit(5, v, a.set_dl_dst);
                let v = bit(6, v, a.set_nw_src);
                let v = bit(7, v, a.set_nw_dst);
                let v = bit(8, v, a.set_nw_tos);
                let v = bit(9, v, a.set_tp_src);
                let v = bit(10, v, a.set_tp_dst);
                let v = bit(11, v, a.enqueue);
                bit(12, v, a.vendor)
            }
        };
        bytes.write_u32::<BigEndian>(acts as u32).unwrap();
        if let Some(ports) = sf.ports {
            for pd in ports {
                PortDesc0x01::marshal(&pd, bytes);
            }
        }
        Ok(())
    }
}

#[repr(packed)]
struct OfpFlowMod(u64, u16, u16, u16, u16, u32, u16, u16);

pub struct FlowMod0x01;

impl FlowMod0x01 {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool, emergency: bool) -> u16 {
        (if notify_when_removed { 1 << 0 } else { 0 })
            | (if check_overlap { 1 << 1 } else { 0 })
            | (if emergency { 1 << 2 } else { 0 })
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        2 & flags != 0
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        1 & flags != 0
    }

    fn emergency_of_flags(flags: u16) -> bool {
        4 & flags != 0
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        Pattern0x01::size_of(&msg.pattern)
            + size_of::<OfpFlowMod>()
            + Action0x01::size_of_sequence(&msg.actions)
    }

    fn parse(buf: &[u8]) -> Result<FlowMod, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let pattern = Pattern0x01::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let command = bytes.read_u16::<BigEndian>()?;
        let command = FlowModCmd::of_int(command).ok_or_else(|| {
            OfpSerializationError::UnexpectedValueError {
                value: format!("{}", command),
                field: "command".to_string(),
                message: "flow mod".to_string(),
            }
        })?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let prio = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_i32::<BigEndian>()?;
        let out_port = PseudoPort0x01::of_int(bytes.read_u16::<BigEndian>()?)?;
        let flags = bytes.read_u16::<BigEndian>()?;
        let actions = Action0x01::parse_sequence(&mut bytes)?;
        Ok(FlowMod {
            table: TableId(0),
            command,
            pattern,
            priority: prio,
            actions,
            write_start: None,
            cookie,
            cookie_mask: 0,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod0x01::notify_when_removed_of_flags(flags),
            apply_to_packet: {
                match buffer_id {
                    -1 => None,
                    n => Some(n as u32),
                }
            },
            out_port,
            check_overlap: FlowMod0x01::check_overlap_of_flags(flags),
            emergency: FlowMod0x01::emergency_of_flags(flags),
        })
    }

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        Pattern0x01::marshal(fm.pattern, bytes)?;
        bytes.write_u64::<BigEndian>(fm.cookie).unwrap();
        bytes.write_u16::<BigEndian>(fm.command as u16).unwrap();
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
                Some(buf_id) => buf_id as i32,
            })
            .unwrap();
        match fm.out_port {
            None => bytes.write_u16::<BigEndian>(OfpPort::OFPPNone as u16).unwrap(),
            Some(x) => PseudoPort0x01::marshal(x, bytes),
        }
        bytes
            .write_u16::<BigEndian>(FlowMod0x01::flags_to_int(
                fm.check_overlap,
                fm.notify_when_removed,
                fm.emergency,
            ))
            .unwrap();
        Action0x01::marshal_sequence(fm.actions, bytes)
    }
}

#[repr(packed)]
struct OfpSwitchConfig(u16, u16);

impl MessageType for SwitchConfig {
    fn size_of(_: &SwitchConfig) -> usize {
        size_of::<OfpSwitchConfig>()
    }

    fn parse(buf: &[u8]) -> Result<SwitchConfig, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let flags = bytes.read_u16::<BigEndian>()?;
        let frag_policy = FragPolicy::of_int(flags).ok_or_else(|| {
            OfpSerializationError::UnexpectedValueError {
                value: format!("0x{:x}", flags),
                field: "flags".to_string(),
                message: "switch config".to_string(),
            }
        })?;
        let miss_send_len = bytes.read_u16::<BigEndian>()?;
        Ok(SwitchConfig {
            frag_policy,
            miss_send_len,
        })
    }

    fn marshal(sc: SwitchConfig, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u16::<BigEndian>(sc.frag_policy as u16).unwrap();
        bytes.write_u16::<BigEndian>(sc.miss_send_len).unwrap();
        Ok(())
    }
}

#[repr(packed)]
struct OfpPortMod(u16, [u8; 6], u32, u32, u32, [u8; 4]);

impl MessageType for PortMod {
    fn size_of(_: &PortMod) -> usize {
        size_of::<OfpPortMod>()
    }

    fn parse(buf: &[u8]) -> Result<PortMod, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let port_no = bytes.read_u16::<BigEndian>()?;
        let mut mac: [u8; 6] = [0; 6];
        bytes.read_exact(&mut mac)?;
        let config = PortConfig0x01::of_int(bytes.read_u32::<BigEndian>()?);
        let mask = PortConfig0x01::of_int(bytes.read_u32::<BigEndian>()?);
        let advertise = bytes.read_u32::<BigEndian>()?;
        bytes.consume(4);
        Ok(PortMod {
            port_no,
            hw_addr: mac_of_bytes(mac),
            config,
            mask,
            advertise: if advertise == 0 {
                None
            } else {
                Some(PortFeatures0x01::of_int(advertise))
            },
        })
    }

    fn marshal(pm: PortMod, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u16::<BigEndian>(pm.port_no).unwrap();
        bytes.extend_from_slice(&bytes_of_mac(pm.hw_addr));
        bytes
            .write_u32::<BigEndian>(PortConfig0x01::to_int(&pm.config))
            .unwrap();
        bytes
            .write_u32::<BigEndian>(PortConfig0x01::to_int(&pm.mask))
            .unwrap();
        bytes
            .write_u32::<BigEndian>(pm.advertise.map(|f| PortFeatures0x01::to_int(&f)).unwrap_or(0))
            .unwrap();
        write_padding_bytes(bytes, 4);
        Ok(())
    }
}

#[repr(u32)]
pub enum OfpQueue {
    OFPQAll = 0xffffffff,
}

pub struct StatsReqType0x01;

impl StatsReqType0x01 {
    pub fn from_u16(value: u16) -> StatsReqType {
        match value {
            0 => StatsReqType::Desc,
            1 => StatsReqType::Flow,
            2 => StatsReqType::Aggregate,
            3 => StatsReqType::Table,
            4 => StatsReqType::Port,
            5 => StatsReqType::Queue,
            _ => StatsReqType::Vendor,
        }
    }
}

#[repr(packed)]
struct OfpStatsReq(u16, u16);
#[repr(packed)]
struct OfpStatsReqFlowBody(u8, u8, u16);
#[repr(packed)]
struct OfpStatsReqPortBody(u16, [u8; 6]);
#[repr(packed)]
struct OfpStatsReqQueueBody(u16, [u8; 2], u32);

impl MessageType for StatsReq {
    fn size_of(msg: &StatsReq) -> usize {
        size_of::<OfpStatsReq>()
            + match &msg.body {
                StatsReqBody::DescBody => 0,
                StatsReqBody::FlowStatsBody { pattern, .. } => {
                    Pattern0x01::size_of(pattern) + size_of::<OfpStatsReqFlowBody>()
                }
                StatsReqBody::TableBody => 0,
                StatsReqBody::PortBody { .. } => size_of::<OfpStatsReqPortBody>(),
                StatsReqBody::QueueBody { .. } => size_of::<OfpStatsReqQueueBody>(),
                StatsReqBody::VendorBody { body, .. } => 4 + body.len(),
            }
    }

    fn parse(buf: &[u8]) -> Result<StatsReq, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let req_type = StatsReqType0x01::from_u16(bytes.read_u16::<BigEndian>()?);
        let flags = bytes.read_u16::<BigEndian>()?;
        let body = match req_type {
            StatsReqType::Desc => StatsReqBody::DescBody,
            StatsReqType::Flow | StatsReqType::Aggregate => {
                let pattern = Pattern0x01::parse(&mut bytes)?;
                let table_id = bytes.read_u8()?;
                bytes.consume(1);
                let out_port = bytes.read_u16::<BigEndian>()?;
                StatsReqBody::FlowStatsBody {
                    pattern,
                    table_id,
                    out_port,
                }
            }
            StatsReqType::Table => StatsReqBody::TableBody,
            StatsReqType::Port => {
                let port_no = bytes.read_u16::<BigEndian>()?;
                bytes.consume(6);
                StatsReqBody::PortBody { port_no }
            }
            StatsReqType::Queue => {
                let port_no = bytes.read_u16::<BigEndian>()?;
                bytes.consume(2);
                let queue_id = bytes.read_u32::<BigEndian>()?;
                StatsReqBody::QueueBody { port_no, queue_id }
            }
            StatsReqType::Vendor => {
                let vendor = bytes.read_u32::<BigEndian>()?;
                let mut body = Vec::new();
                bytes.read_to_end(&mut body)?;
                StatsReqBody::VendorBody { vendor, body }
            }
        };
        Ok(StatsReq {
            req_type,
            flags,
            body,
        })
    }

    fn marshal(sr: StatsReq, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u16::<BigEndian>(sr.req_type as u16).unwrap();
        bytes.write_u16::<BigEndian>(sr.flags).unwrap();
        match sr.body {
            StatsReqBody::DescBody => {}
            StatsReqBody::FlowStatsBody {
                pattern,
                table_id,
                out_port,
            } => {
                Pattern0x01::marshal(pattern, bytes)?;
                bytes.write_u8(table_id).unwrap();
                write_padding_bytes(bytes, 1);
                bytes.write_u16::<BigEndian>(out_port).unwrap();
            }
            StatsReqBody::TableBody => {}
            StatsReqBody::PortBody { port_no } => {
                bytes.write_u16::<BigEndian>(port_no).unwrap();
                write_padding_bytes(bytes, 6);
            }
            StatsReqBody::QueueBody { port_no, queue_id } => {
                bytes.write_u16::<BigEndian>(port_no).unwrap();
                write_padding_bytes(bytes, 2);
                bytes.write_u32::<BigEndian>(queue_id).unwrap();
            }
            StatsReqBody::VendorBody { vendor, body } => {
                bytes.write_u32::<BigEndian>(vendor).unwrap();
                bytes.extend_from_slice(&body);
            }
        }
        Ok(())
    }
}

pub struct TransmissionCounter0x01;

impl TransmissionCounter0x01 {
    fn parse(bytes: &mut Cursor<Vec<u8>>) -> Result<TransmissionCounter, OfpSerializationError> {
        let rx = bytes.read_u64::<BigEndian>()?;
        let tx = bytes.read_u64::<BigEndian>()?;
        Ok(TransmissionCounter { rx, tx })
    }

    fn marshal(c: &TransmissionCounter, bytes: &mut Vec<u8>) {
        bytes.write_u64::<BigEndian>(c.rx).unwrap();
        bytes.write_u64::<BigEndian>(c.tx).unwrap();
    }
}

#[repr(packed)]
struct OfpStatsResp(u16, u16);
#[repr(packed)]
struct OfpStatsRespFlowStats(u16, u8, u8, u32, u32, u16, u16, u16, [u8; 6], u64, u64, u64);
#[repr(packed)]
struct OfpStatsRespAggregateBody(u64, u64, u32, [u8; 4]);
#[repr(packed)]
struct OfpStatsRespTableStats(u8, [u8; 3], [u8; OFP_MAX_TABLE_NAME_LENGTH], u32, u32, u32, u64, u64);
#[repr(packed)]
struct OfpStatsRespQueueStats(u16, [u8; 2], u32, u64, u64, u64);
#[repr(packed)]
struct OfpStatsRespPortStats(u16, [u8; 6], [u64; 2], [u64; 2], [u64; 2], [u64; 2], u64, u64, u64, u64);

pub struct FlowStats0x01;

impl FlowStats0x01 {
    pub fn size_of(stats: &FlowStats) -> usize {
        Pattern0x01::size_of(&stats.pattern)
            + size_of::<OfpStatsRespFlowStats>()
            + Action0x01::size_of_sequence(&stats.actions)
    }

    fn marshal(stats: FlowStats, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes
            .write_u16::<BigEndian>(FlowStats0x01::size_of(&stats) as u16)
            .unwrap();
        bytes.write_u8(stats.table_id).unwrap();
        write_padding_bytes(bytes, 1);
        Pattern0x01::marshal(stats.pattern, bytes)?;
        bytes.write_u32::<BigEndian>(stats.duration_sec).unwrap();
        bytes.write_u32::<BigEndian>(stats.duration_nsec).unwrap();
        bytes.write_u16::<BigEndian>(stats.priority).unwrap();
        bytes.write_u16::<BigEndian>(stats.idle_timeout).unwrap();
        bytes.write_u16::<BigEndian>(stats.hard_timeout).unwrap();
        write_padding_bytes(bytes, 6);
        bytes.write_u64::<BigEndian>(stats.cookie).unwrap();
        bytes.write_u64::<BigEndian>(stats.packet_count).unwrap();
        bytes.write_u64::<BigEndian>(stats.byte_count).unwrap();
        Action0x01::marshal_sequence(stats.actions, bytes)
    }
}

impl MessageType for StatsResp {
    fn size_of(msg: &StatsResp) -> usize {
        size_of::<OfpStatsResp>()
            + match msg.body {
                StatsRespBody::DescBody { .. } => DESC_STR_LENGTH * 4 + SERIAL_NUM_LENGTH,
                StatsRespBody::FlowStatsBody { ref flow_stats } => {
                    flow_stats.iter().map(FlowStats0x01::size_of).sum()
                }
                StatsRespBody::AggregateStatsBody { .. } => size_of::<OfpStatsRespAggregateBody>(),
                StatsRespBody::TableBody { ref table_stats } => {
                    table_stats.len() * size_of::<OfpStatsRespTableStats>()
                }
                StatsRespBody::PortBody { ref port_stats } => {
                    port_stats.len() * size_of::<OfpStatsRespPortStats>()
                }
                StatsRespBody::QueueBody { ref queue_stats } => {
                    queue_stats.len() * size_of::<OfpStatsRespQueueStats>()
                }
                StatsRespBody::VendorBody { ref body, .. } => 4 + body.len(),
            }
    }

    fn parse(buf: &[u8]) -> Result<StatsResp, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let req_type = StatsReqType0x01::from_u16(bytes.read_u16::<BigEndian>()?);
        let flags = bytes.read_u16::<BigEndian>()?;
        let body = match req_type {
            StatsReqType::Desc => {
                let manufacturer_desc = read_fixed_size_string(&mut bytes, DESC_STR_LENGTH)?;
                let hardware_desc = read_fixed_size_string(&mut bytes, DESC_STR_LENGTH)?;
                let software_desc = read_fixed_size_string(&mut bytes, DESC_STR_LENGTH)?;
                let serial_number = read_fixed_size_string(&mut bytes, SERIAL_NUM_LENGTH)?;
                let datapath_desc = read_fixed_size_string(&mut bytes, DESC_STR_LENGTH)?;
                StatsRespBody::DescBody {
                    manufacturer_desc,
                    hardware_desc,
                    software_desc,
                    serial_number,
                    datapath_desc,
                }
            }
            StatsReqType::Flow => {
                let mut flow_stats = Vec::<FlowStats>::new();
                while bytes.remaining() > 0 {
                    let entry_length = bytes.read_u16::<BigEndian>()? as usize;
                    if entry_length < 2 || bytes.remaining() + 2 < entry_length {
                        return Err(OfpSerializationError::BadLength {
                            message: "flow stats entry".to_string(),
                        });
                    }
                    let mut flow_data = vec![0; entry_length - 2];
                    bytes.read_exact(&mut flow_data)?;
                    let mut flow = Cursor::new(flow_data);

                    let table_id = flow.read_u8()?;
                    flow.consume(1);
                    let pattern = Pattern0x01::parse(&mut flow)?;
                    let duration_sec = flow.read_u32::<BigEndian>()?;
                    let duration_nsec = flow.read_u32::<BigEndian>()?;
                    let priority = flow.read_u16::<BigEndian>()?;
                    let idle_timeout = flow.read_u16::<BigEndian>()?;
                    let hard_timeout = flow.read_u16::<BigEndian>()?;
                    flow.consume(6);
                    let cookie = flow.read_u64::<BigEndian>()?;
                    let packet_count = flow.read_u64::<BigEndian>()?;
                    let byte_count = flow.read_u64::<BigEndian>()?;
                    let actions = Action0x01::parse_sequence(&mut flow)?;

                    flow_stats.push(FlowStats {
                        table_id,
                        pattern,
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
                StatsRespBody::FlowStatsBody { flow_stats }
            }
            StatsReqType::Aggregate => {
                let packet_count = bytes.read_u64::<BigEndian>()?;
                let byte_count = bytes.read_u64::<BigEndian>()?;
                let flow_count = bytes.read_u32::<BigEndian>()?;
                bytes.consume(4);
                StatsRespBody::AggregateStatsBody {
                    packet_count,
                    byte_count,
                    flow_count,
                }
            }
            StatsReqType::Table => {
                let mut table_stats = Vec::<TableStats>::new();
                while bytes.remaining() >= size_of::<OfpStatsRespTableStats>() {
                    let table_id = bytes.read_u8()?;
                    bytes.consume(3);
                    let name = read_fixed_size_string(&mut bytes, OFP_MAX_TABLE_NAME_LENGTH)?;
                    let wildcards = Wildcards0x01::parse(bytes.read_u32::<BigEndian>()?);
                    let max_entries = bytes.read_u32::<BigEndian>()?;
                    let active_count = bytes.read_u32::<BigEndian>()?;
                    let lookup_count = bytes.read_u64::<BigEndian>()?;
                    let matched_count = bytes.read_u64::<BigEndian>()?;

                    table_stats.push(TableStats {
                        table_id,
                        name,
                        wildcards,
                        max_entries,
                        active_count,
                        lookup_count,
                        matched_count,
                    });
                }
                StatsRespBody::TableBody { table_stats }
            }
            StatsReqType::Port => {
                let mut port_stats = Vec::<PortStats>::new();
                while bytes.remaining() >= size_of::<OfpStatsRespPortStats>() {
                    let port_no = bytes.read_u16::<BigEndian>()?;
                    bytes.consume(6);
                    let packets = TransmissionCounter0x01::parse(&mut bytes)?;
                    let bytes_counter = TransmissionCounter0x01::parse(&mut bytes)?;
                    let dropped = TransmissionCounter0x01::parse(&mut bytes)?;
                    let errors = TransmissionCounter0x01::parse(&mut bytes)?;
                    let rx_frame_errors = bytes.read_u64::<BigEndian>()?;
                    let rx_over_errors = bytes.read_u64::<BigEndian>()?;
                    let rx_crc_errors = bytes.read_u64::<BigEndian>()?;
                    let collisions = bytes.read_u64::<BigEndian>()?;

                    port_stats.push(PortStats {
                        port_no,
                        packets,
                        bytes: bytes_counter,
                        dropped,
                        errors,
                        rx_frame_errors,
                        rx_over_errors,
                        rx_crc_errors,
                        collisions,
                    });
                }
                StatsRespBody::PortBody { port_stats }
            }
            StatsReqType::Queue => {
                let mut queue_stats = Vec::<QueueStats>::new();
                while bytes.remaining() >= size_of::<OfpStatsRespQueueStats>() {
                    let port_no = bytes.read_u16::<BigEndian>()?;
                    bytes.consume(2);
                    let queue_id = bytes.read_u32::<BigEndian>()?;
                    let tx_bytes = bytes.read_u64::<BigEndian>()?;
                    let tx_packets = bytes.read_u64::<BigEndian>()?;
                    let tx_errors = bytes.read_u64::<BigEndian>()?;

                    queue_stats.push(QueueStats {
                        port_no,
                        queue_id,
                        tx_bytes,
                        tx_packets,
                        tx_errors,
                    });
                }
                StatsRespBody::QueueBody { queue_stats }
            }
            StatsReqType::Vendor => {
                let vendor = bytes.read_u32::<BigEndian>()?;
                let mut body = Vec::new();
                bytes.read_to_end(&mut body)?;
                StatsRespBody::VendorBody { vendor, body }
            }
        };
        Ok(StatsResp {
            req_type,
            flags,
            body,
        })
    }

    fn marshal(sr: StatsResp, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u16::<BigEndian>(sr.req_type as u16).unwrap();
        bytes.write_u16::<BigEndian>(sr.flags).unwrap();
        match sr.body {
            StatsRespBody::DescBody {
                manufacturer_desc,
                hardware_desc,
                software_desc,
                serial_number,
                datapath_desc,
            } => {
                write_fixed_size_string(bytes, &manufacturer_desc, DESC_STR_LENGTH);
                write_fixed_size_string(bytes, &hardware_desc, DESC_STR_LENGTH);
                write_fixed_size_string(bytes, &software_desc, DESC_STR_LENGTH);
                write_fixed_size_string(bytes, &serial_number, SERIAL_NUM_LENGTH);
                write_fixed_size_string(bytes, &datapath_desc, DESC_STR_LENGTH);
            }
            StatsRespBody::FlowStatsBody { flow_stats } => {
                for stats in flow_stats {
                    FlowStats0x01::marshal(stats, bytes)?;
                }
            }
            StatsRespBody::AggregateStatsBody {
                packet_count,
                byte_count,
                flow_count,
            } => {
                bytes.write_u64::<BigEndian>(packet_count).unwrap();
                bytes.write_u64::<BigEndian>(byte_count).unwrap();
                bytes.write_u32::<BigEndian>(flow_count).unwrap();
                write_padding_bytes(bytes, 4);
            }
            StatsRespBody::TableBody { table_stats } => {
                for ts in table_stats {
                    bytes.write_u8(ts.table_id).unwrap();
                    write_padding_bytes(bytes, 3);
                    write_fixed_size_string(bytes, &ts.name, OFP_MAX_TABLE_NAME_LENGTH);
                    Wildcards0x01::marshal(ts.wildcards, bytes);
                    bytes.write_u32::<BigEndian>(ts.max_entries).unwrap();
                    bytes.write_u32::<BigEndian>(ts.active_count).unwrap();
                    bytes.write_u64::<BigEndian>(ts.lookup_count).unwrap();
                    bytes.write_u64::<BigEndian>(ts.matched_count).unwrap();
                }
            }
            StatsRespBody::PortBody { port_stats } => {
                for ps in port_stats {
                    bytes.write_u16::<BigEndian>(ps.port_no).unwrap();
                    write_padding_bytes(bytes, 6);
                    TransmissionCounter0x01::marshal(&ps.packets, bytes);
                    TransmissionCounter0x01::marshal(&ps.bytes, bytes);
                    TransmissionCounter0x01::marshal(&ps.dropped, bytes);
                    TransmissionCounter0x01::marshal(&ps.errors, bytes);
                    bytes.write_u64::<BigEndian>(ps.rx_frame_errors).unwrap();
                    bytes.write_u64::<BigEndian>(ps.rx_over_errors).unwrap();
                    bytes.write_u64::<BigEndian>(ps.rx_crc_errors).unwrap();
                    bytes.write_u64::<BigEndian>(ps.collisions).unwrap();
                }
            }
            StatsRespBody::QueueBody { queue_stats } => {
                for qs in queue_stats {
                    bytes.write_u16::<BigEndian>(qs.port_no).unwrap();
                    write_padding_bytes(bytes, 2);
                    bytes.write_u32::<BigEndian>(qs.queue_id).unwrap();
                    bytes.write_u64::<BigEndian>(qs.tx_bytes).unwrap();
                    bytes.write_u64::<BigEndian>(qs.tx_packets).unwrap();
                    bytes.write_u64::<BigEndian>(qs.tx_errors).unwrap();
                }
            }
            StatsRespBody::VendorBody { vendor, body } => {
                bytes.write_u32::<BigEndian>(vendor).unwrap();
                bytes.extend_from_slice(&body);
            }
        }
        Ok(())
    }
}

pub struct Payload0x01;

impl Payload0x01 {
    fn marshal(payload: Payload, bytes: &mut Vec<u8>) {
        match payload {
            Payload::Buffered(_, buf) | Payload::NotBuffered(buf) => bytes.extend_from_slice(&buf),
        }
    }
}

#[repr(packed)]
struct OfpPacketIn(i32, u16, u16, u8, u8);

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        size_of::<OfpPacketIn>() + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let buf_id = match bytes.read_i32::<BigEndian>()? {
            -1 => None,
            n => Some(n),
        };
        let total_len = bytes.read_u16::<BigEndian>()?;
        let port = bytes.read_u16::<BigEndian>()?;
        let reason_byte = bytes.read_u8()?;
        let reason = PacketInReason::of_int(reason_byte).ok_or_else(|| {
            OfpSerializationError::UnexpectedValueError {
                value: format!("{}", reason_byte),
                field: "reason".to_string(),
                message: "packet in".to_string(),
            }
        })?;
        bytes.consume(1);
        let pk = bytes.fill_buf()?.to_vec();
        let payload = match buf_id {
            None => Payload::NotBuffered(pk),
            Some(n) => Payload::Buffered(n as u32, pk),
        };
        Ok(PacketIn {
            input_payload: payload,
            total_len,
            port,
            reason,
        })
    }

    fn marshal(pi: PacketIn, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        let buf_id = match pi.input_payload {
            Payload::NotBuffered(_) => -1,
            Payload::Buffered(n, _) => n as i32,
        };
        bytes.write_i32::<BigEndian>(buf_id).unwrap();
        bytes.write_u16::<BigEndian>(pi.total_len).unwrap();
        bytes.write_u16::<BigEndian>(pi.port).unwrap();
        bytes.write_u8(pi.reason as u8).unwrap();
        bytes.write_u8(0).unwrap(); // Padding
        Payload0x01::marshal(pi.input_payload, bytes);
        Ok(())
    }
}

#[repr(packed)]
struct OfpPacketOut(u32, u16, u16);

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        size_of::<OfpPacketOut>()
            + Action0x01::size_of_sequence(&po.apply_actions)
            + Payload::size_of(&po.output_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketOut, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let buf_id = match bytes.read_i32::<BigEndian>()? {
            -1 => None,
            n => Some(n),
        };
        let in_port = bytes.read_u16::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        if bytes.remaining() < actions_len {
            return Err(OfpSerializationError::BadLength {
                message: "packet out actions".to_string(),
            });
        }
        let mut actions_buf = vec![0; actions_len];
        bytes.read_exact(&mut actions_buf)?;
        let mut actions_bytes = Cursor::new(actions_buf);
        let actions = Action0x01::parse_sequence(&mut actions_bytes)?;
        Ok(PacketOut {
            output_payload: match buf_id {
                None => Payload::NotBuffered(bytes.fill_buf()?.to_vec()),
                Some(n) => Payload::Buffered(n as u32, bytes.fill_buf()?.to_vec()),
            },
            port_id: {
                if in_port == OfpPort::OFPPNone as u16 {
                    None
                } else {
                    Some(in_port)
                }
            },
            apply_actions: actions,
        })
    }

    fn marshal(po: PacketOut, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes
            .write_i32::<BigEndian>(match po.output_payload {
                Payload::Buffered(n, _) => n as i32,
                Payload::NotBuffered(_) => -1,
            })
            .unwrap();
        match po.port_id {
            Some(id) => PseudoPort0x01::marshal(PseudoPort::PhysicalPort(id), bytes),
            None => bytes.write_u16::<BigEndian>(OfpPort::OFPPNone as u16).unwrap(),
        }
        bytes
            .write_u16::<BigEndian>(Action0x01::size_of_sequence(&po.apply_actions) as u16)
            .unwrap();
        for act in Action0x01::move_controller_last(po.apply_actions) {
            Action0x01::marshal(act, bytes)?;
        }
        Payload0x01::marshal(po.output_payload, bytes);
        Ok(())
    }
}

#[repr(packed)]
struct OfpFlowRemoved(u64, u16, u8, u8, u32, u32, u16, u16, u64, u64);

impl MessageType for FlowRemoved {
    fn size_of(f: &FlowRemoved) -> usize {
        Pattern0x01::size_of(&f.pattern) + size_of::<OfpFlowRemoved>()
    }

    fn parse(buf: &[u8]) -> Result<FlowRemoved, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let pattern = Pattern0x01::parse(&mut bytes)?;
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
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        bytes.consume(2);
        let packet_count = bytes.read_u64::<BigEndian>()?;
        let byte_count = bytes.read_u64::<BigEndian>()?;
        Ok(FlowRemoved {
            pattern,
            cookie,
            priority,
            reason,
            duration_sec,
            duration_nsec,
            idle_timeout: idle,
            packet_count,
            byte_count,
        })
    }

    fn marshal(f: FlowRemoved, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        Pattern0x01::marshal(f.pattern, bytes)?;
        bytes.write_u64::<BigEndian>(f.cookie).unwrap();
        bytes.write_u16::<BigEndian>(f.priority).unwrap();
        bytes.write_u8(f.reason as u8).unwrap();
        bytes.write_u8(0).unwrap();
        bytes.write_u32::<BigEndian>(f.duration_sec).unwrap();
        bytes.write_u32::<BigEndian>(f.duration_nsec).unwrap();
        bytes
            .write_u16::<BigEndian>(Timeout::to_int(f.idle_timeout))
            .unwrap();
        write_padding_bytes(bytes, 2);
        bytes.write_u64::<BigEndian>(f.packet_count).unwrap();
        bytes.write_u64::<BigEndian>(f.byte_count).unwrap();
        Ok(())
    }
}

pub struct PortFeatures0x01;

impl PortFeatures0x01 {
    pub fn of_int(d: u32) -> PortFeatures {
        PortFeatures {
            f_10mbhd: test_bit(0, d as u64),
            f_10mbfd: test_bit(1, d as u64),
            f_100mbhd: test_bit(2, d as u64),
            f_100mbfd: test_bit(3, d as u64),
            f_1gbhd: test_bit(4, d as u64),
            f_1gbfd: test_bit(5, d as u64),
            f_10gbfd: test_bit(6, d as u64),
            copper: test_bit(7, d as u64),
            fiber: test_bit(8, d as u64),
            autoneg: test_bit(9, d as u64),
            pause: test_bit(10, d as u64),
            pause_asym: test_bit(11, d as u64),
        }
    }

    pub fn to_int(f: &PortFeatures) -> u32 {
        let v = 0u64;
        let v = bit(0, v, f.f_10mbhd);
        let v = bit(1, v, f.f_10mbfd);
        let v = bit(2, v, f.f_100mbhd);
        let v = bit(3, v, f.f_100mbfd);
        let v = bit(4, v, f.f_1gbhd);
        let v = bit(5, v, f.f_1gbfd);
        let v = bit(6, v, f.f_10gbfd);
        let v = bit(7, v, f.copper);
        let v = bit(8, v, f.fiber);
        let v = bit(9, v, f.autoneg);
        let v = bit(10, v, f.pause);
        let v = bit(11, v, f.pause_asym);
        v as u32
    }
}

pub struct PortConfig0x01;

impl PortConfig0x01 {
    pub fn of_int(d: u32) -> PortConfig {
        PortConfig {
            down: test_bit(0, d as u64),
            no_stp: test_bit(1, d as u64),
            no_recv: test_bit(2, d as u64),
            no_recv_stp: test_bit(3, d as u64),
            no_flood: test_bit(4, d as u64),
            no_fwd: test_bit(5, d as u64),
            no_packet_in: test_bit(6, d as u64),
        }
    }

    pub fn to_int(c: &PortConfig) -> u32 {
        let v = 0u64;
        let v = bit(0, v, c.down);
        let v = bit(1, v, c.no_stp);
        let v = bit(2, v, c.no_recv);
        let v = bit(3, v, c.no_recv_stp);
        let v = bit(4, v, c.no_flood);
        let v = bit(5, v, c.no_fwd);
        let v = bit(6, v, c.no_packet_in);
        v as u32
    }
}

#[repr(packed)]
struct OfpPhyPort(u16, [u8; 6], [u8; 16], u32, u32, u32, u32, u32, u32);

pub struct PortDesc0x01;

impl PortDesc0x01 {
    pub fn size_of(_: &PortDesc) -> usize {
        size_of::<OfpPhyPort>()
    }

    pub fn parse(bytes: &mut Cursor<Vec<u8>>) -> Result<PortDesc, OfpSerializationError> {
        let port_no = bytes.read_u16::<BigEndian>()?;
        let hw_addr = {
            let mut arr: [u8; 6] = [0; 6];
            bytes.read_exact(&mut arr)?;
            mac_of_bytes(arr)
        };
        let name = read_fixed_size_string(bytes, 16)?;
        let config = PortConfig0x01::of_int(bytes.read_u32::<BigEndian>()?);
        let state = {
            let d = bytes.read_u32::<BigEndian>()?;
            PortState {
                down: test_bit(0, d as u64),
                stp_state: {
                    let mask: u32 = 3 << 8;
                    let d_masked = d & mask;
                    if d_masked == (StpState::Listen as u32) << 8 {
                        StpState::Listen
                    } else if d_masked == (StpState::Learn as u32) << 8 {
                        StpState::Learn
                    } else if d_masked == (StpState::Forward as u32) << 8 {
                        StpState::Forward
                    } else if d_masked == (StpState::Block as u32) << 8 {
                        StpState::Block
                    } else {
                        return Err(OfpSerializationError::UnexpectedValueError {
                            value: format!("{:x}", d_masked),
                            field: "ofp_port_state/stp_state".to_string(),
                            message: "Port Description".to_string(),
                        });
                    }
                },
            }
        };
        let curr = PortFeatures0x01::of_int(bytes.read_u32::<BigEndian>()?);
        let advertised = PortFeatures0x01::of_int(bytes.read_u32::<BigEndian>()?);
        let supported = PortFeatures0x01::of_int(bytes.read_u32::<BigEndian>()?);
        let peer = PortFeatures0x01::of_int(bytes.read_u32::<BigEndian>()?);
        Ok(PortDesc {
            port_no,
            hw_addr,
            name,
            config,
            state,
            curr,
            advertised,
            supported,
            peer,
        })
    }

    pub fn marshal(pd: &PortDesc, bytes: &mut Vec<u8>) {
        bytes.write_u16::<BigEndian>(pd.port_no).unwrap();
        bytes.extend_from_slice(&bytes_of_mac(pd.hw_addr));
        write_fixed_size_string(bytes, &pd.name, 16);
        bytes
            .write_u32::<BigEndian>(PortConfig0x01::to_int(&pd.config))
            .unwrap();
        let state = {
            let v = bit(0, 0u64, pd.state.down) as u32;
            v | ((pd.state.stp_state as u32) << 8)
        };
        bytes.write_u32::<BigEndian>(state).unwrap();
        bytes
            .write_u32::<BigEndian>(PortFeatures0x01::to_int(&pd.curr))
            .unwrap();
        bytes
            .write_u32::<BigEndian>(PortFeatures0x01::to_int(&pd.advertised))
            .unwrap();
        bytes
            .write_u32::<BigEndian>(PortFeatures0x01::to_int(&pd.supported))
            .unwrap();
        bytes
            .write_u32::<BigEndian>(PortFeatures0x01::to_int(&pd.peer))
            .unwrap();
    }
}

impl MessageType for PortStatus {
    fn size_of(_: &PortStatus) -> usize {
        8 + size_of::<OfpPhyPort>()
    }

    fn parse(buf: &[u8]) -> Result<PortStatus, OfpSerializationError> {
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
        let desc = PortDesc0x01::parse(&mut bytes)?;
        Ok(PortStatus { reason, desc })
    }

    fn marshal(ps: PortStatus, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u8(ps.reason as u8).unwrap();
        write_padding_bytes(bytes, 7);
        PortDesc0x01::marshal(&ps.desc, bytes);
        Ok(())
    }
}

#[repr(packed)]
struct OfpErrorMsg(u16, u16);

/// Nicira places extended bad-match codes in the BAD_REQUEST class at this
/// offset, since OpenFlow 1.0 has no BAD_MATCH error type.
const NX_BAD_MATCH_BASE: u16 = 0x100;

fn error_code_ints(et: &ErrorType) -> (u16, u16) {
    match *et {
        ErrorType::HelloFailed(c) => (0, c as u16),
        ErrorType::BadRequest(c) => (1, c as u16),
        ErrorType::BadMatch(c) => (1, NX_BAD_MATCH_BASE + c as u16),
        ErrorType::BadAction(c) => (2, c as u16),
        ErrorType::FlowModFailed(c) => (3, c as u16),
        ErrorType::PortModFailed(c) => (4, c as u16),
        ErrorType::QueueOpFailed(c) => (5, c as u16),
    }
}

fn error_type_of_ints(typ: u16, code: u16) -> Result<ErrorType, OfpSerializationError> {
    let bad = |field: &str| OfpSerializationError::UnexpectedValueError {
        value: format!("{:x}", code),
        field: field.to_string(),
        message: "error".to_string(),
    };
    Ok(match typ {
        0 => ErrorType::HelloFailed(match code {
            0 => HelloFailed::Incompatible,
            1 => HelloFailed::EPerm,
            _ => return Err(bad("hello failed code")),
        }),
        1 if code >= NX_BAD_MATCH_BASE => ErrorType::BadMatch(match code - NX_BAD_MATCH_BASE {
            0 => BadMatch::BadField,
            1 => BadMatch::BadPrereq,
            2 => BadMatch::DupField,
            3 => BadMatch::BadValue,
            4 => BadMatch::BadMask,
            5 => BadMatch::BadLen,
            _ => return Err(bad("bad match code")),
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
            _ => return Err(bad("bad request code")),
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
            _ => return Err(bad("bad action code")),
        }),
        3 => ErrorType::FlowModFailed(match code {
            0 => FlowModFailed::AllTablesFull,
            1 => FlowModFailed::Overlap,
            2 => FlowModFailed::EPerm,
            3 => FlowModFailed::BadEmergTimeout,
            4 => FlowModFailed::BadCommand,
            5 => FlowModFailed::Unsupported,
            _ => return Err(bad("flow mod failed code")),
        }),
        4 => ErrorType::PortModFailed(match code {
            0 => PortModFailed::BadPort,
            1 => PortModFailed::BadHwAddr,
            _ => return Err(bad("port mod failed code")),
        }),
        5 => ErrorType::QueueOpFailed(match code {
            0 => QueueOpFailed::BadPort,
            1 => QueueOpFailed::BadQueue,
            2 => QueueOpFailed::EPerm,
            _ => return Err(bad("queue op failed code")),
        }),
        _ => {
            return Err(OfpSerializationError::UnexpectedValueError {
                value: format!("{:x}", typ),
                field: "error type".to_string(),
                message: "error".to_string(),
            })
        }
    })
}

impl MessageType for Error {
    fn size_of(err: &Error) -> usize {
        match *err {
            Error::Error(_, ref body) => size_of::<OfpErrorMsg>() + body.len(),
        }
    }

    fn parse(buf: &[u8]) -> Result<Error, OfpSerializationError> {
        let mut bytes = Cursor::new(buf.to_vec());
        let error_type = bytes.read_u16::<BigEndian>()?;
        let error_code = bytes.read_u16::<BigEndian>()?;
        let code = error_type_of_ints(error_type, error_code)?;
        Ok(Error::Error(code, bytes.fill_buf()?.to_vec()))
    }

    fn marshal(err: Error, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        let Error::Error(et, body) = err;
        let (typ, code) = error_code_ints(&et);
        bytes.write_u16::<BigEndian>(typ).unwrap();
        bytes.write_u16::<BigEndian>(code).unwrap();
        bytes.extend_from_slice(&body);
        Ok(())
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::{OfpHeader, OPENFLOW_0_01_VERSION};
    use crate::ofp_message::OfpMessage;
    use crate::openflow::MsgCode;

    pub struct Message0x01 {
        inner: Message,
    }

    impl From<Message> for Message0x01 {
        fn from(m: Message) -> Self {
            Message0x01 { inner: m }
        }
    }

    impl Message0x01 {
        pub fn message(self) -> Message {
            self.inner
        }

        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
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

        fn msg_code_to_u8(msgcode: &MsgCode) -> u8 {
            match msgcode {
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
                MsgCode::PortMod => 15,
                MsgCode::StatsReq => 16,
                MsgCode::StatsResp => 17,
                MsgCode::BarrierReq => 18,
                MsgCode::BarrierResp => 19,
                MsgCode::QueueGetConfigReq => 20,
                MsgCode::QueueGetConfigResp => 21,
            }
        }

        /// Marshal the OpenFlow message `msg`.
        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
            match msg {
                Message::Hello => Ok(()),
                Message::Error(err) => Error::marshal(err, bytes),
                Message::EchoReply(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::EchoRequest(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::Vendor(nx) => nicira::marshal(nx, bytes),
                Message::FeaturesReq => Ok(()),
                Message::FeaturesReply(sf) => SwitchFeatures::marshal(sf, bytes),
                Message::GetConfigReq => Ok(()),
                Message::GetConfigReply(sc) => SwitchConfig::marshal(sc, bytes),
                Message::SetConfig(sc) => SwitchConfig::marshal(sc, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::FlowRemoved(flow) => FlowRemoved::marshal(flow, bytes),
                Message::PortStatus(sts) => PortStatus::marshal(sts, bytes),
                Message::PacketOut(po) => PacketOut::marshal(po, bytes),
                Message::PortMod(pm) => PortMod::marshal(pm, bytes),
                Message::BarrierRequest | Message::BarrierReply => Ok(()),
                Message::StatsRequest(stats_req) => StatsReq::marshal(stats_req, bytes),
                Message::StatsReply(stats_resp) => StatsResp::marshal(stats_resp, bytes),
                Message::QueueGetConfigReq { port } => {
                    bytes.write_u16::<BigEndian>(port).unwrap();
                    write_padding_bytes(bytes, 2);
                    Ok(())
                }
            }
        }
    }

    impl OfpMessage for Message0x01 {
        fn size_of(msg: &Message0x01) -> usize {
            OfpHeader::size()
                + match msg.inner {
                    Message::Hello => 0,
                    Message::Error(ref err) => Error::size_of(err),
                    Message::EchoRequest(ref buf) => buf.len(),
                    Message::EchoReply(ref buf) => buf.len(),
                    Message::Vendor(ref nx) => nicira::size_of(nx),
                    Message::FeaturesReq => 0,
                    Message::FeaturesReply(ref sf) => SwitchFeatures::size_of(sf),
                    Message::GetConfigReq => 0,
                    Message::GetConfigReply(ref sc) => SwitchConfig::size_of(sc),
                    Message::SetConfig(ref sc) => SwitchConfig::size_of(sc),
                    Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                    Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                    Message::FlowRemoved(ref flow) => FlowRemoved::size_of(flow),
                    Message::PortStatus(ref ps) => PortStatus::size_of(ps),
                    Message::PacketOut(ref po) => PacketOut::size_of(po),
                    Message::PortMod(ref pm) => PortMod::size_of(pm),
                    Message::BarrierRequest | Message::BarrierReply => 0,
                    Message::StatsRequest(ref sr) => StatsReq::size_of(sr),
                    Message::StatsReply(ref sr) => StatsResp::size_of(sr),
                    Message::QueueGetConfigReq { .. } => 4,
                }
        }

        fn header_of(xid: u32, msg: &Message0x01) -> Result<OfpHeader, OfpSerializationError> {
            let sizeof_buf = Self::size_of(msg);
            Ok(OfpHeader::new(
                OPENFLOW_0_01_VERSION,
                Self::msg_code_to_u8(&Self::msg_code_of_message(&msg.inner)),
                sizeof_buf as u16,
                xid,
            ))
        }

        fn marshal(xid: u32, msg: Message0x01) -> Result<Vec<u8>, OfpSerializationError> {
            let hdr = Self::header_of(xid, &msg)?;
            let mut bytes = vec![];
            OfpHeader::marshal(&mut bytes, hdr);
            Message0x01::marshal_body(msg.inner, &mut bytes)?;
            Ok(bytes)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message0x01), OfpSerializationError> {
            let typ = header.type_code()?;
            let msg = Message0x01 {
                inner: match typ {
                    MsgCode::Hello => Message::Hello,
                    MsgCode::Error => Message::Error(Error::parse(buf)?),
                    MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                    MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                    MsgCode::Vendor => Message::Vendor(nicira::parse(buf)?),
                    MsgCode::FeaturesReq => Message::FeaturesReq,
                    MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                    MsgCode::GetConfigReq => Message::GetConfigReq,
                    MsgCode::GetConfigResp => Message::GetConfigReply(SwitchConfig::parse(buf)?),
                    MsgCode::SetConfig => Message::SetConfig(SwitchConfig::parse(buf)?),
                    MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                    MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                    MsgCode::FlowRemoved => Message::FlowRemoved(FlowRemoved::parse(buf)?),
                    MsgCode::PortStatus => Message::PortStatus(PortStatus::parse(buf)?),
                    MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                    MsgCode::PortMod => Message::PortMod(PortMod::parse(buf)?),
                    MsgCode::BarrierReq => Message::BarrierRequest,
                    MsgCode::BarrierResp => Message::BarrierReply,
                    MsgCode::StatsReq => Message::StatsRequest(StatsReq::parse(buf)?),
                    MsgCode::StatsResp => Message::StatsReply(StatsResp::parse(buf)?),
                    MsgCode::QueueGetConfigReq => {
                        let mut bytes = Cursor::new(buf.to_vec());
                        let port = bytes.read_u16::<BigEndian>()?;
                        Message::QueueGetConfigReq { port }
                    }
                    code => {
                        return Err(OfpSerializationError::UnexpectedValueError {
                            value: format!("0x{:x}", code as u8),
                            field: "message type".to_string(),
                            message: "message header".to_string(),
                        })
                    }
                },
            };
            Ok((header.xid(), msg))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const TEST_XID: u32 = 0x12345678;
        const TEST_DPID: u64 = 0x0011223344556677;

        fn roundtrip(message: Message) -> Message {
            let data = Message0x01::marshal(TEST_XID, Message0x01::from(message)).unwrap();
            let header = OfpHeader::parse(&data[..OfpHeader::size()]).unwrap();
            assert_eq!(header.version(), OPENFLOW_0_01_VERSION);
            assert_eq!(header.xid(), TEST_XID);
            assert_eq!(header.length(), data.len());
            let (xid, msg) = Message0x01::parse(&header, &data[OfpHeader::size()..]).unwrap();
            assert_eq!(xid, TEST_XID);
            msg.inner
        }

        fn port_desc() -> PortDesc {
            PortDesc {
                port_no: 1,
                hw_addr: 0xAABBCCDDEEFF,
                name: "port_1".to_string(),
                config: PortConfig {
                    down: false,
                    no_stp: false,
                    no_recv: false,
                    no_recv_stp: true,
                    no_flood: false,
                    no_fwd: false,
                    no_packet_in: false,
                },
                state: PortState {
                    down: false,
                    stp_state: StpState::Listen,
                },
                curr: PortFeatures {
                    f_100mbfd: true,
                    f_1gbfd: true,
                    copper: true,
                    autoneg: true,
                    ..Default::default()
                },
                advertised: PortFeatures {
                    f_100mbfd: true,
                    copper: true,
                    ..Default::default()
                },
                supported: PortFeatures {
                    f_100mbfd: true,
                    f_1gbfd: true,
                    copper: true,
                    ..Default::default()
                },
                peer: PortFeatures::default(),
            }
        }

        fn switch_features() -> SwitchFeatures {
            SwitchFeatures {
                datapath_id: TEST_DPID,
                num_buffers: 256,
                num_tables: 2,
                supported_capabilities: Capabilities {
                    flow_stats: true,
                    table_stats: true,
                    port_stats: true,
                    stp: false,
                    ip_reasm: false,
                    queue_stats: false,
                    arp_match_ip: true,
                },
                supported_actions: Some(SupportedActions::all()),
                ports: Some(vec![port_desc()]),
            }
        }

        fn flow_mod_pattern() -> Pattern {
            let mut pattern = Pattern::match_all();
            pattern.in_port = Some(1);
            pattern.dl_typ = Some(0x0800);
            pattern.nw_proto = Some(6);
            pattern.nw_dst = Some(Mask {
                value: 0x10000001,
                mask: Some(8),
            });
            pattern.tp_src = Some(3000);
            pattern.tp_dst = Some(4000);
            pattern
        }

        fn flow_mod_actions() -> Vec<Action> {
            vec![
                Action::SetDlDst(0x1234567890AB),
                Action::Output(PseudoPort::PhysicalPort(1)),
            ]
        }

        fn flow_mod() -> FlowMod {
            FlowMod {
                table: TableId(0),
                command: FlowModCmd::AddFlow,
                pattern: flow_mod_pattern(),
                priority: 16,
                actions: flow_mod_actions(),
                write_start: None,
                cookie: 0x1234567887654321,
                cookie_mask: 0,
                idle_timeout: Timeout::ExpiresAfter(180),
                hard_timeout: Timeout::Permanent,
                notify_when_removed: true,
                apply_to_packet: None,
                out_port: None,
                check_overlap: true,
                emergency: false,
            }
        }

        #[test]
        fn hello_roundtrip() {
            assert_eq!(roundtrip(Message::Hello), Message::Hello);
        }

        #[test]
        fn echo_roundtrip() {
            let payload = vec![0xAB; 5];
            assert_eq!(
                roundtrip(Message::EchoRequest(payload.clone())),
                Message::EchoRequest(payload.clone())
            );
            assert_eq!(
                roundtrip(Message::EchoReply(payload.clone())),
                Message::EchoReply(payload)
            );
        }

        #[test]
        fn features_roundtrip() {
            assert_eq!(roundtrip(Message::FeaturesReq), Message::FeaturesReq);
            let reply = Message::FeaturesReply(switch_features());
            assert_eq!(roundtrip(reply.clone()), reply);
        }

        #[test]
        fn flow_mod_roundtrip() {
            let msg = Message::FlowMod(flow_mod());
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn flow_mod_wire_layout() {
            let data =
                Message0x01::marshal(TEST_XID, Message0x01::from(Message::FlowMod(flow_mod())))
                    .unwrap();
            // header + match + fixed body + two actions (16 + 8 bytes)
            assert_eq!(data.len(), 8 + 40 + 24 + 24);
            assert_eq!(data[1], 14); // OFPT_FLOW_MOD
            // flags: send-flow-removed | check-overlap
            assert_eq!(data[8 + 40 + 22], 0);
            assert_eq!(data[8 + 40 + 23], 0x3);
        }

        #[test]
        fn flow_mod_with_vendor_actions_roundtrip() {
            let mut fm = flow_mod();
            fm.actions = vec![
                Action::SetTunnel(0xabcdef),
                Action::Note(vec![1, 2, 3]),
                Action::DecTtl,
                Action::FinTimeout { idle: 10, hard: 0 },
                Action::Output(PseudoPort::PhysicalPort(2)),
            ];
            let msg = Message::FlowMod(fm);
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn packet_in_roundtrip() {
            let msg = Message::PacketIn(PacketIn {
                input_payload: Payload::Buffered(77, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]),
                total_len: 10,
                port: 1,
                reason: PacketInReason::NoMatch,
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn packet_out_roundtrip() {
            let msg = Message::PacketOut(PacketOut {
                output_payload: Payload::NotBuffered(vec![1, 2, 3, 4]),
                port_id: Some(1),
                apply_actions: vec![Action::Output(PseudoPort::Flood)],
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn flow_removed_roundtrip() {
            let msg = Message::FlowRemoved(FlowRemoved {
                pattern: flow_mod_pattern(),
                cookie: 0x1234,
                priority: 22,
                reason: FlowRemovedReason::IdleTimeout,
                duration_sec: 123,
                duration_nsec: 456000,
                idle_timeout: Timeout::ExpiresAfter(60),
                packet_count: 100,
                byte_count: 120500,
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn port_status_roundtrip() {
            let msg = Message::PortStatus(PortStatus {
                reason: PortReason::PortAdd,
                desc: port_desc(),
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn port_mod_roundtrip() {
            let msg = Message::PortMod(PortMod {
                port_no: 3,
                hw_addr: 0xAABBCCDDEEFF,
                config: PortConfig {
                    no_flood: true,
                    ..Default::default()
                },
                mask: PortConfig {
                    no_flood: true,
                    ..Default::default()
                },
                advertise: None,
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn config_roundtrip() {
            let sc = SwitchConfig {
                frag_policy: FragPolicy::Drop,
                miss_send_len: 128,
            };
            assert_eq!(roundtrip(Message::SetConfig(sc)), Message::SetConfig(sc));
            assert_eq!(
                roundtrip(Message::GetConfigReply(sc)),
                Message::GetConfigReply(sc)
            );
        }

        #[test]
        fn barrier_roundtrip() {
            assert_eq!(roundtrip(Message::BarrierRequest), Message::BarrierRequest);
            assert_eq!(roundtrip(Message::BarrierReply), Message::BarrierReply);
        }

        #[test]
        fn stats_request_roundtrip() {
            let msg = Message::StatsRequest(StatsReq {
                req_type: StatsReqType::Flow,
                flags: 0,
                body: StatsReqBody::FlowStatsBody {
                    pattern: Pattern::match_all(),
                    table_id: ALL_TABLES,
                    out_port: OfpPort::OFPPNone as u16,
                },
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn desc_stats_reply_roundtrip() {
            let msg = Message::StatsReply(StatsResp {
                req_type: StatsReqType::Desc,
                flags: 0,
                body: StatsRespBody::DescBody {
                    manufacturer_desc: "manufacturer".to_string(),
                    hardware_desc: "hardware".to_string(),
                    software_desc: "software".to_string(),
                    serial_number: "12345".to_string(),
                    datapath_desc: "dp001".to_string(),
                },
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn flow_stats_reply_roundtrip() {
            let msg = Message::StatsReply(StatsResp {
                req_type: StatsReqType::Flow,
                flags: 0,
                body: StatsRespBody::FlowStatsBody {
                    flow_stats: vec![
                        FlowStats {
                            table_id: 0,
                            pattern: Pattern::match_all(),
                            duration_sec: 120,
                            duration_nsec: 123456789,
                            priority: 33,
                            idle_timeout: 0,
                            hard_timeout: 0,
                            cookie: 0x12345678,
                            packet_count: 5000,
                            byte_count: 640000,
                            actions: vec![Action::Output(PseudoPort::Controller(0))],
                        },
                        FlowStats {
                            table_id: 0,
                            pattern: flow_mod_pattern(),
                            duration_sec: 10,
                            duration_nsec: 0,
                            priority: 65,
                            idle_timeout: 500,
                            hard_timeout: 0,
                            cookie: 0x87654321,
                            packet_count: 10,
                            byte_count: 10000,
                            actions: flow_mod_actions(),
                        },
                    ],
                },
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn aggregate_stats_reply_roundtrip() {
            let msg = Message::StatsReply(StatsResp {
                req_type: StatsReqType::Aggregate,
                flags: 0,
                body: StatsRespBody::AggregateStatsBody {
                    packet_count: 1000,
                    byte_count: 64000,
                    flow_count: 5,
                },
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn table_stats_reply_roundtrip() {
            let msg = Message::StatsReply(StatsResp {
                req_type: StatsReqType::Table,
                flags: 0,
                body: StatsRespBody::TableBody {
                    table_stats: vec![TableStats {
                        table_id: 0,
                        name: "classifier".to_string(),
                        wildcards: Wildcards::all(),
                        max_entries: 1024 * 1024,
                        active_count: 3,
                        lookup_count: 0,
                        matched_count: 0,
                    }],
                },
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }

        #[test]
        fn port_and_queue_stats_reply_roundtrip() {
            let port = Message::StatsReply(StatsResp {
                req_type: StatsReqType::Port,
                flags: 0,
                body: StatsRespBody::PortBody {
                    port_stats: vec![PortStats {
                        port_no: 1,
                        packets: TransmissionCounter { rx: 1000, tx: 2000 },
                        bytes: TransmissionCounter {
                            rx: 1 << 29,
                            tx: 1 << 30,
                        },
                        dropped: TransmissionCounter { rx: 5, tx: 0 },
                        errors: TransmissionCounter { rx: 0, tx: 0 },
                        rx_frame_errors: 1,
                        rx_over_errors: 2,
                        rx_crc_errors: 3,
                        collisions: 4,
                    }],
                },
            });
            assert_eq!(roundtrip(port.clone()), port);
            let queue = Message::StatsReply(StatsResp {
                req_type: StatsReqType::Queue,
                flags: 0,
                body: StatsRespBody::QueueBody {
                    queue_stats: vec![QueueStats {
                        port_no: 1,
                        queue_id: 7,
                        tx_bytes: 100,
                        tx_packets: 2,
                        tx_errors: 0,
                    }],
                },
            });
            assert_eq!(roundtrip(queue.clone()), queue);
        }

        #[test]
        fn error_roundtrip() {
            let cases = vec![
                ErrorType::BadRequest(BadRequest::EPerm),
                ErrorType::BadMatch(BadMatch::BadPrereq),
                ErrorType::BadAction(BadAction::BadVendorType),
                ErrorType::FlowModFailed(FlowModFailed::Overlap),
                ErrorType::PortModFailed(PortModFailed::BadPort),
                ErrorType::QueueOpFailed(QueueOpFailed::BadPort),
            ];
            for et in cases {
                let msg = Message::Error(Error::Error(et, vec![0xAB; 10]));
                assert_eq!(roundtrip(msg.clone()), msg);
            }
        }

        #[test]
        fn unknown_action_type_is_rejected() {
            // type 0x7777, len 8
            let body: Vec<u8> = vec![0x77, 0x77, 0, 8, 0, 0, 0, 0];
            let mut cursor = Cursor::new(body);
            assert!(Action0x01::parse_sequence(&mut cursor).is_err());
        }

        #[test]
        fn truncated_action_is_rejected() {
            // output action claims 16 bytes but only 8 are present
            let body: Vec<u8> = vec![0, 0, 0, 16, 0, 1, 0, 0];
            let mut cursor = Cursor::new(body);
            assert!(Action0x01::parse_sequence(&mut cursor).is_err());
        }

        #[test]
        fn extended_match_does_not_fit_in_fixed_struct() {
            let mut pattern = Pattern::match_all();
            pattern.tun_id = Some(Mask::exact(7));
            let mut fm = flow_mod();
            fm.pattern = pattern;
            assert!(
                Message0x01::marshal(TEST_XID, Message0x01::from(Message::FlowMod(fm))).is_err()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_serialization() {
        let mask = 8;
        let data = 0;
        let serialized = Wildcards0x01::set_nw_mask(data, 14, mask);
        let deserialized = Wildcards0x01::get_nw_mask(serialized, 14);
        assert_eq!(mask, deserialized);
    }

    #[test]
    fn match_all_wildcards_are_all_set() {
        let w = Wildcards::all();
        assert!(w.in_port && w.dl_vlan && w.dl_src && w.dl_dst && w.dl_type);
        assert_eq!(w.nw_src, 32);
        assert_eq!(w.nw_dst, 32);
    }

    #[test]
    fn reserved_port_numbers_are_rejected() {
        assert!(PseudoPort0x01::make(0xff01, 0).is_err());
        assert!(PseudoPort0x01::make(0xff00, 0).is_ok());
        assert!(PseudoPort0x01::of_int(0xffff).unwrap().is_none());
    }
}
