use std::io;

use thiserror::Error;

use crate::ofp_header::{OfpHeader, Xid};
use crate::openflow::MsgCode;

/// Errors raised while decoding or encoding OpenFlow messages.
///
/// Every variant maps onto the OpenFlow error taxonomy via
/// `message::ErrorType`, so that the dispatcher can answer the offending
/// connection with a well-formed error reply.
#[derive(Debug, Error)]
pub enum OfpSerializationError {
    #[error("IO Error: {error}")]
    IoError {
        #[from]
        error: io::Error,
    },
    #[error("Unexpected value '{value}' at field '{field}' of '{message}'")]
    UnexpectedValueError {
        value: String,
        field: String,
        message: String,
    },
    #[error("Length mismatch in '{message}'")]
    BadLength { message: String },
    #[error("Unsupported protocol version 0x{version:02x}")]
    UnsupportedVersion { version: u8 },
    #[error("Message code {code} is not supported in version 0x{version:02x}")]
    UnsupportedMessageCode { version: u8, code: MsgCode },
    #[error("Version 0x{version:02x} does not implement {feature}")]
    UnimplementedFeatureInVersion { version: u8, feature: String },
    #[error("Bad match entry 0x{header:08x}: {kind}")]
    BadMatchEntry { header: u32, kind: MatchEntryError },
    #[error("Bad action: {kind} ({detail})")]
    BadActionEntry { kind: ActionEntryError, detail: String },
}

/// Why a TLV match entry was rejected, mirroring the on-wire bad-match codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum MatchEntryError {
    #[error("unknown field")]
    BadField,
    #[error("failed prerequisite")]
    BadPrereq,
    #[error("duplicate field")]
    DupField,
    #[error("invalid value")]
    BadValue,
    #[error("invalid mask")]
    BadMask,
    #[error("bad length")]
    BadLength,
}

/// Why an action entry was rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum ActionEntryError {
    #[error("unknown type")]
    BadType,
    #[error("bad length")]
    BadLength,
    #[error("unknown vendor")]
    BadVendor,
    #[error("unknown vendor subtype")]
    BadVendorType,
    #[error("bad output port")]
    BadOutPort,
    #[error("bad argument")]
    BadArgument,
    #[error("bad queue")]
    BadQueue,
}

/// OpenFlow Message
///
/// Version-agnostic API for handling OpenFlow messages at the byte-buffer level.
pub trait OfpMessage {
    /// Return the byte-size of an `OfpMessage`.
    fn size_of(msg: &Self) -> usize;
    /// Create an `OfpHeader` for the given transaction id and OpenFlow message.
    fn header_of(xid: Xid, msg: &Self) -> Result<OfpHeader, OfpSerializationError>;
    /// Return a marshaled buffer containing an OpenFlow header and the message `msg`.
    fn marshal(xid: Xid, msg: Self) -> Result<Vec<u8>, OfpSerializationError>;
    /// Returns a pair `(Xid, OfpMessage)` of the transaction id and OpenFlow message parsed from
    /// the given OpenFlow header `header`, and buffer `buf`.
    fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(Xid, Self), OfpSerializationError>
    where
        Self: Sized;
}
