use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::ofp_message::OfpSerializationError;
use crate::openflow::MsgCode;

pub const OFP_HEADER_LENGTH: usize = 8;

/// The largest message, header included, that any OpenFlow version can
/// express with its 16-bit length field.
pub const OFP_MAX_MSG_LENGTH: usize = 65535;

pub type Xid = u32;

pub const OPENFLOW_0_01_VERSION: u8 = 1; // 1.0
pub const OPENFLOW_0_02_VERSION: u8 = 2; // 1.1
pub const OPENFLOW_0_03_VERSION: u8 = 3; // 1.2

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: u32,
}

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub fn size() -> usize {
        OFP_HEADER_LENGTH
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(bytes: &mut Vec<u8>, header: OfpHeader) {
        bytes.write_u8(header.version()).unwrap();
        bytes.write_u8(header.typ).unwrap();
        bytes.write_u16::<BigEndian>(header.length).unwrap();
        bytes.write_u32::<BigEndian>(header.xid()).unwrap();
    }

    /// Takes a message buffer (sized for an `OfpHeader`) and returns an `OfpHeader`.
    pub fn parse(buf: &[u8]) -> Result<Self, OfpSerializationError> {
        if buf.len() < OFP_HEADER_LENGTH {
            return Err(OfpSerializationError::BadLength {
                message: "header".to_string(),
            });
        }
        let mut bytes = Cursor::new(buf);
        Ok(OfpHeader {
            version: bytes.read_u8().unwrap(),
            typ: bytes.read_u8().unwrap(),
            length: bytes.read_u16::<BigEndian>().unwrap(),
            xid: bytes.read_u32::<BigEndian>().unwrap(),
        })
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the raw `type` byte of a header.
    pub fn type_byte(&self) -> u8 {
        self.typ
    }

    /// Return the OpenFlow message type code of a header, or an error if the
    /// type byte is outside the defined range.
    pub fn type_code(&self) -> Result<MsgCode, OfpSerializationError> {
        MsgCode::from_u8(self.typ).ok_or(OfpSerializationError::UnexpectedValueError {
            value: format!("0x{:x}", self.typ),
            field: "message type".to_string(),
            message: "message header".to_string(),
        })
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    /// Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = OfpHeader::new(OPENFLOW_0_01_VERSION, 14, 72, 0x12345678);
        let mut buf = Vec::new();
        OfpHeader::marshal(&mut buf, header.clone());
        assert_eq!(buf.len(), OFP_HEADER_LENGTH);
        let parsed = OfpHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.type_code().unwrap(), MsgCode::FlowMod);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let header = OfpHeader::new(OPENFLOW_0_01_VERSION, 99, 8, 1);
        assert!(header.type_code().is_err());
    }

    #[test]
    fn short_header_is_rejected() {
        assert!(OfpHeader::parse(&[1, 2, 3]).is_err());
    }
}
