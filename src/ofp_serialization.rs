//! Version dispatch: route raw buffers to the dialect codec named by the
//! header's version byte.

use bytes::BytesMut;

use crate::message::Message;
use crate::ofp_header::{
    OfpHeader, Xid, OFP_MAX_MSG_LENGTH, OPENFLOW_0_01_VERSION, OPENFLOW_0_02_VERSION,
    OPENFLOW_0_03_VERSION,
};
use crate::ofp_message::OfpSerializationError;

/// The set of protocol versions a switch is willing to speak.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VersionSet(u8);

impl VersionSet {
    pub fn all() -> VersionSet {
        VersionSet(
            (1 << OPENFLOW_0_01_VERSION) | (1 << OPENFLOW_0_02_VERSION)
                | (1 << OPENFLOW_0_03_VERSION),
        )
    }

    pub fn only(version: u8) -> VersionSet {
        VersionSet(1 << version)
    }

    pub fn with(self, version: u8) -> VersionSet {
        VersionSet(self.0 | (1 << version))
    }

    pub fn contains(&self, version: u8) -> bool {
        version < 8 && self.0 & (1 << version) != 0
    }

    /// The highest enabled version, used when answering a Hello.
    pub fn highest(&self) -> u8 {
        (0..8).rev().find(|v| self.contains(*v)).unwrap_or(0)
    }
}

impl Default for VersionSet {
    fn default() -> VersionSet {
        VersionSet::all()
    }
}

/// Parse a message with every version enabled.
pub fn parse(header: &OfpHeader, body: &BytesMut) -> Result<(Xid, Message), OfpSerializationError> {
    parse_with_versions(header, body, VersionSet::all())
}

/// Parse a message, rejecting versions outside `enabled`. `Hello` is always
/// parsed so version negotiation can answer an incompatible peer.
pub fn parse_with_versions(
    header: &OfpHeader,
    body: &BytesMut,
    enabled: VersionSet,
) -> Result<(Xid, Message), OfpSerializationError> {
    if header.length() > OFP_MAX_MSG_LENGTH
        || header.length() != OfpHeader::size() + body.len()
    {
        return Err(OfpSerializationError::BadLength {
            message: "message length does not match header".to_string(),
        });
    }
    let version = header.version();
    if !enabled.contains(version) {
        // A Hello from a version we do not speak still decodes, so the
        // caller can reply with an incompatible-version error.
        if header.type_byte() == 0 {
            return Ok((header.xid(), Message::Hello));
        }
        return Err(OfpSerializationError::UnsupportedVersion { version });
    }
    match version {
        OPENFLOW_0_01_VERSION => openflow0x01::parse(header, body),
        OPENFLOW_0_02_VERSION => openflow0x02::parse(header, body),
        OPENFLOW_0_03_VERSION => openflow0x03::parse(header, body),
        v => Err(OfpSerializationError::UnsupportedVersion { version: v }),
    }
}

pub fn marshal(version: u8, xid: Xid, message: Message) -> Result<Vec<u8>, OfpSerializationError> {
    match version {
        OPENFLOW_0_01_VERSION => openflow0x01::marshal(xid, message),
        OPENFLOW_0_02_VERSION => openflow0x02::marshal(xid, message),
        OPENFLOW_0_03_VERSION => openflow0x03::marshal(xid, message),
        v => Err(OfpSerializationError::UnsupportedVersion { version: v }),
    }
}

pub mod openflow0x01 {
    use super::*;
    use crate::ofp_message::OfpMessage;
    use crate::openflow0x01::message::Message0x01;

    pub fn marshal(xid: Xid, message: Message) -> Result<Vec<u8>, OfpSerializationError> {
        Message0x01::marshal(xid, Message0x01::from(message))
    }

    pub fn parse(
        header: &OfpHeader,
        body: &BytesMut,
    ) -> Result<(Xid, Message), OfpSerializationError> {
        Message0x01::parse(header, body).map(|x| (x.0, x.1.message()))
    }
}

pub mod openflow0x02 {
    use super::*;
    use crate::ofp_message::OfpMessage;
    use crate::openflow0x02::message::Message0x02;

    pub fn marshal(xid: Xid, message: Message) -> Result<Vec<u8>, OfpSerializationError> {
        Message0x02::marshal(xid, Message0x02::from(message))
    }

    pub fn parse(
        header: &OfpHeader,
        body: &BytesMut,
    ) -> Result<(Xid, Message), OfpSerializationError> {
        Message0x02::parse(header, body).map(|x| (x.0, x.1.message()))
    }
}

pub mod openflow0x03 {
    use super::*;
    use crate::ofp_message::OfpMessage;
    use crate::openflow0x03::message::Message0x03;

    pub fn marshal(xid: Xid, message: Message) -> Result<Vec<u8>, OfpSerializationError> {
        Message0x03::marshal(xid, Message0x03::from(message))
    }

    pub fn parse(
        header: &OfpHeader,
        body: &BytesMut,
    ) -> Result<(Xid, Message), OfpSerializationError> {
        Message0x03::parse(header, body).map(|x| (x.0, x.1.message()))
    }
}

/// Split one complete framed message off the front of `buffer`, parse it,
/// and return it with its header. Returns `Ok(None)` when the buffer does
/// not yet hold a complete message.
pub fn take_message(
    buffer: &mut BytesMut,
    enabled: VersionSet,
) -> Result<Option<(OfpHeader, Xid, Message)>, OfpSerializationError> {
    if buffer.len() < OfpHeader::size() {
        return Ok(None);
    }
    let header = OfpHeader::parse(&buffer[..OfpHeader::size()])?;
    if header.length() < OfpHeader::size() {
        return Err(OfpSerializationError::BadLength {
            message: "header length shorter than header".to_string(),
        });
    }
    if buffer.len() < header.length() {
        return Ok(None);
    }
    let mut frame = buffer.split_to(header.length());
    let body = frame.split_off(OfpHeader::size());
    let (xid, message) = parse_with_versions(&header, &body, enabled)?;
    Ok(Some((header, xid, message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_set_defaults_to_all() {
        let set = VersionSet::default();
        assert!(set.contains(OPENFLOW_0_01_VERSION));
        assert!(set.contains(OPENFLOW_0_02_VERSION));
        assert!(set.contains(OPENFLOW_0_03_VERSION));
        assert!(!set.contains(4));
        assert_eq!(set.highest(), OPENFLOW_0_03_VERSION);
    }

    #[test]
    fn parse_rejects_disabled_version() {
        let data = marshal(OPENFLOW_0_02_VERSION, 5, Message::BarrierRequest).unwrap();
        let header = OfpHeader::parse(&data[..OfpHeader::size()]).unwrap();
        let body = BytesMut::from(&data[OfpHeader::size()..]);
        let err = parse_with_versions(&header, &body, VersionSet::only(OPENFLOW_0_01_VERSION))
            .unwrap_err();
        assert!(matches!(err, OfpSerializationError::UnsupportedVersion { version: 2 }));
    }

    #[test]
    fn hello_from_disabled_version_still_parses() {
        let data = marshal(OPENFLOW_0_03_VERSION, 9, Message::Hello).unwrap();
        let header = OfpHeader::parse(&data[..OfpHeader::size()]).unwrap();
        let body = BytesMut::from(&data[OfpHeader::size()..]);
        let (xid, msg) =
            parse_with_versions(&header, &body, VersionSet::only(OPENFLOW_0_01_VERSION)).unwrap();
        assert_eq!(xid, 9);
        assert_eq!(msg, Message::Hello);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let data = marshal(OPENFLOW_0_01_VERSION, 1, Message::EchoRequest(vec![1, 2, 3])).unwrap();
        let header = OfpHeader::parse(&data[..OfpHeader::size()]).unwrap();
        // Short body: claim 3 payload bytes but provide 2.
        let body = BytesMut::from(&data[OfpHeader::size()..data.len() - 1]);
        assert!(parse(&header, &body).is_err());
    }

    #[test]
    fn take_message_waits_for_full_frame() {
        let data = marshal(OPENFLOW_0_01_VERSION, 3, Message::EchoRequest(vec![7; 4])).unwrap();
        let mut buffer = BytesMut::from(&data[..6]);
        assert!(take_message(&mut buffer, VersionSet::all()).unwrap().is_none());
        buffer.extend_from_slice(&data[6..]);
        let (header, xid, msg) = take_message(&mut buffer, VersionSet::all()).unwrap().unwrap();
        assert_eq!(header.version(), OPENFLOW_0_01_VERSION);
        assert_eq!(xid, 3);
        assert_eq!(msg, Message::EchoRequest(vec![7; 4]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn same_message_decodes_across_versions() {
        for version in [OPENFLOW_0_01_VERSION, OPENFLOW_0_02_VERSION, OPENFLOW_0_03_VERSION] {
            let data = marshal(version, 11, Message::BarrierRequest).unwrap();
            let header = OfpHeader::parse(&data[..OfpHeader::size()]).unwrap();
            let body = BytesMut::from(&data[OfpHeader::size()..]);
            let (_, msg) = parse(&header, &body).unwrap();
            assert_eq!(msg, Message::BarrierRequest);
        }
    }
}
