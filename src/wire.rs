//! The binary frame codec.
//!
//! Every exchange on the wire is one request frame answered by one response
//! frame. A frame is a fixed 10-byte header followed by a payload; response
//! payloads open with a 4-byte status word, and both payload kinds then carry
//! a block of tagged property values. All integers are little-endian.
//!
//! Encoding and decoding are pure transforms in both directions, so a test
//! fake can speak the protocol with the same functions the client uses.

use std::error::Error as StdError;
use std::fmt;
use std::str;

use chrono::{DateTime, Utc};
use nom::bytes::streaming::take;
use nom::number::streaming::{le_i64, le_u16, le_u32, le_u64, le_u8};
use nom::IResult;

use crate::status::Status;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 10;

/// Upper bound a peer may claim for a single frame payload.
pub const MAX_PAYLOAD: u32 = 1 << 24;

const KIND_REQUEST: u8 = 0;
const KIND_RESPONSE: u8 = 1;

/// Property value type codes, packed into the low 16 bits of a tag.
mod ty {
    pub const LONG: u16 = 0x0003;
    pub const ID: u16 = 0x0014;
    pub const STRING: u16 = 0x001E;
    pub const TIME: u16 = 0x0040;
    pub const BINARY: u16 = 0x0102;
    pub const ID_ARRAY: u16 = 0x1014;
    pub const STRING_ARRAY: u16 = 0x101E;
}

/// Property IDs used by the operations in this crate (high 16 bits of a tag).
pub mod tags {
    pub const SUBJECT: u16 = 0x0037;
    pub const CLIENT_SUBMIT_TIME: u16 = 0x0039;
    pub const DISPLAY_TO: u16 = 0x0E04;
    pub const BODY: u16 = 0x1000;
    pub const ADDRESS_TYPES: u16 = 0x3002;
    pub const SESSION_COOKIE: u16 = 0x6701;
    pub const MAILBOX: u16 = 0x6702;
    pub const STORE_ID: u16 = 0x6703;
    pub const DEFAULT_FOLDER: u16 = 0x6704;
    pub const LOCK_STATE: u16 = 0x6705;
    pub const OBJECT_ID: u16 = 0x6708;
    pub const FOLDER_ID: u16 = 0x6748;
    pub const MESSAGE_ID: u16 = 0x674A;
}

/// Operation numbers carried in the frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Release = 0x01,
    OpenFolder = 0x02,
    CreateMessage = 0x06,
    SetProperties = 0x0A,
    SaveChangesMessage = 0x0C,
    DeleteMessages = 0x1E,
    GetDefaultFolder = 0x27,
    SubmitMessage = 0x32,
    AbortSubmit = 0x34,
    SetSpooler = 0x47,
    SpoolerLockMessage = 0x48,
    AddressTypes = 0x49,
    TransportSend = 0x4A,
    GetTransportFolder = 0x6D,
    Logon = 0xFE,
}

impl Opcode {
    fn from_u8(value: u8) -> Option<Opcode> {
        match value {
            0x01 => Some(Opcode::Release),
            0x02 => Some(Opcode::OpenFolder),
            0x06 => Some(Opcode::CreateMessage),
            0x0A => Some(Opcode::SetProperties),
            0x0C => Some(Opcode::SaveChangesMessage),
            0x1E => Some(Opcode::DeleteMessages),
            0x27 => Some(Opcode::GetDefaultFolder),
            0x32 => Some(Opcode::SubmitMessage),
            0x34 => Some(Opcode::AbortSubmit),
            0x47 => Some(Opcode::SetSpooler),
            0x48 => Some(Opcode::SpoolerLockMessage),
            0x49 => Some(Opcode::AddressTypes),
            0x4A => Some(Opcode::TransportSend),
            0x6D => Some(Opcode::GetTransportFolder),
            0xFE => Some(Opcode::Logon),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A typed property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    Long(u32),
    Id(u64),
    String(String),
    Time(DateTime<Utc>),
    Binary(Vec<u8>),
    IdArray(Vec<u64>),
    StringArray(Vec<String>),
}

impl PropValue {
    fn type_code(&self) -> u16 {
        match self {
            PropValue::Long(_) => ty::LONG,
            PropValue::Id(_) => ty::ID,
            PropValue::String(_) => ty::STRING,
            PropValue::Time(_) => ty::TIME,
            PropValue::Binary(_) => ty::BINARY,
            PropValue::IdArray(_) => ty::ID_ARRAY,
            PropValue::StringArray(_) => ty::STRING_ARRAY,
        }
    }
}

/// One tagged property. The wire tag is derived from the property ID and the
/// value's type code, so a `Prop` can never claim a type it does not carry.
#[derive(Clone, Debug, PartialEq)]
pub struct Prop {
    id: u16,
    value: PropValue,
}

impl Prop {
    pub fn new(id: u16, value: PropValue) -> Prop {
        Prop { id, value }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn value(&self) -> &PropValue {
        &self.value
    }

    pub fn tag(&self) -> u32 {
        (u32::from(self.id) << 16) | u32::from(self.value.type_code())
    }
}

fn find(props: &[Prop], id: u16) -> Option<&PropValue> {
    props.iter().find(|p| p.id == id).map(|p| &p.value)
}

/// A request frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub opcode: Opcode,
    pub corr_id: u32,
    pub props: Vec<Prop>,
}

impl Request {
    pub fn prop(&self, id: u16) -> Option<&PropValue> {
        find(&self.props, id)
    }

    pub fn id_value(&self, id: u16) -> Option<u64> {
        match self.prop(id) {
            Some(PropValue::Id(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn long(&self, id: u16) -> Option<u32> {
        match self.prop(id) {
            Some(PropValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, id: u16) -> Option<&str> {
        match self.prop(id) {
            Some(PropValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn ids(&self, id: u16) -> Option<&[u64]> {
        match self.prop(id) {
            Some(PropValue::IdArray(v)) => Some(v),
            _ => None,
        }
    }

    pub fn binary(&self, id: u16) -> Option<&[u8]> {
        match self.prop(id) {
            Some(PropValue::Binary(b)) => Some(b),
            _ => None,
        }
    }
}

/// A response frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub opcode: Opcode,
    pub corr_id: u32,
    pub status: Status,
    pub props: Vec<Prop>,
}

impl Response {
    pub fn prop(&self, id: u16) -> Option<&PropValue> {
        find(&self.props, id)
    }

    pub fn id_value(&self, id: u16) -> Option<u64> {
        match self.prop(id) {
            Some(PropValue::Id(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn long(&self, id: u16) -> Option<u32> {
        match self.prop(id) {
            Some(PropValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, id: u16) -> Option<&str> {
        match self.prop(id) {
            Some(PropValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn strings(&self, id: u16) -> Option<&[String]> {
        match self.prop(id) {
            Some(PropValue::StringArray(v)) => Some(v),
            _ => None,
        }
    }

    pub fn binary(&self, id: u16) -> Option<&[u8]> {
        match self.prop(id) {
            Some(PropValue::Binary(b)) => Some(b),
            _ => None,
        }
    }
}

/// Why a buffer failed to decode. Kept distinct from protocol statuses: a
/// server that *answers* with a failure code is healthy; a frame that cannot
/// be decoded is not.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the structure it declared.
    Truncated,
    UnknownOpcode(u8),
    BadKind(u8),
    UnknownPropType(u16),
    NotUtf8,
    BadTimestamp(i64),
    OversizedPayload(u32),
    TrailingBytes(usize),
    /// The response did not echo the request's correlation ID.
    CorrelationMismatch { sent: u32, received: u32 },
    /// The response did not echo the request's opcode.
    OpcodeMismatch { sent: Opcode, received: Opcode },
    /// A structurally valid response lacked a required property.
    MissingProperty(u16),
    Corrupt,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => f.write_str("truncated frame"),
            DecodeError::UnknownOpcode(op) => write!(f, "unknown opcode {:#04x}", op),
            DecodeError::BadKind(kind) => write!(f, "bad frame kind {:#04x}", kind),
            DecodeError::UnknownPropType(t) => write!(f, "unknown property type {:#06x}", t),
            DecodeError::NotUtf8 => f.write_str("string property is not UTF-8"),
            DecodeError::BadTimestamp(millis) => write!(f, "timestamp {} out of range", millis),
            DecodeError::OversizedPayload(len) => write!(f, "payload length {} too large", len),
            DecodeError::TrailingBytes(n) => write!(f, "{} trailing bytes after frame", n),
            DecodeError::CorrelationMismatch { sent, received } => {
                write!(f, "correlation mismatch: sent #{}, received #{}", sent, received)
            }
            DecodeError::OpcodeMismatch { sent, received } => {
                write!(f, "opcode mismatch: sent {}, received {}", sent, received)
            }
            DecodeError::MissingProperty(id) => write!(f, "missing property {:#06x}", id),
            DecodeError::Corrupt => f.write_str("corrupt frame"),
        }
    }
}

impl StdError for DecodeError {}

// ---- encoding ----

pub fn encode_request(request: &Request) -> Vec<u8> {
    let mut payload = Vec::new();
    put_props(&mut payload, &request.props);
    frame(request.opcode, KIND_REQUEST, request.corr_id, payload)
}

pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&response.status.0.to_le_bytes());
    put_props(&mut payload, &response.props);
    frame(response.opcode, KIND_RESPONSE, response.corr_id, payload)
}

fn frame(opcode: Opcode, kind: u8, corr_id: u32, payload: Vec<u8>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(opcode as u8);
    buf.push(kind);
    buf.extend_from_slice(&corr_id.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf
}

fn put_props(buf: &mut Vec<u8>, props: &[Prop]) {
    buf.extend_from_slice(&(props.len() as u16).to_le_bytes());
    for prop in props {
        buf.extend_from_slice(&prop.tag().to_le_bytes());
        put_value(buf, &prop.value);
    }
}

fn put_value(buf: &mut Vec<u8>, value: &PropValue) {
    match value {
        PropValue::Long(v) => buf.extend_from_slice(&v.to_le_bytes()),
        PropValue::Id(v) => buf.extend_from_slice(&v.to_le_bytes()),
        PropValue::String(s) => put_str(buf, s),
        PropValue::Time(t) => buf.extend_from_slice(&t.timestamp_millis().to_le_bytes()),
        PropValue::Binary(b) => {
            buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
            buf.extend_from_slice(b);
        }
        PropValue::IdArray(ids) => {
            buf.extend_from_slice(&(ids.len() as u16).to_le_bytes());
            for id in ids {
                buf.extend_from_slice(&id.to_le_bytes());
            }
        }
        PropValue::StringArray(items) => {
            buf.extend_from_slice(&(items.len() as u16).to_le_bytes());
            for s in items {
                put_str(buf, s);
            }
        }
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

// ---- decoding ----

/// Extracts and bounds-checks the payload length from a frame header, so a
/// reader can size its buffer before pulling the rest of the frame.
pub fn payload_len(header: &[u8; HEADER_LEN]) -> Result<usize, DecodeError> {
    let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]);
    if len > MAX_PAYLOAD {
        return Err(DecodeError::OversizedPayload(len));
    }
    Ok(len as usize)
}

struct Fail {
    kind: DecodeError,
}

impl<'a> nom::error::ParseError<&'a [u8]> for Fail {
    fn from_error_kind(_input: &'a [u8], _kind: nom::error::ErrorKind) -> Self {
        Fail {
            kind: DecodeError::Corrupt,
        }
    }

    fn append(_input: &'a [u8], _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

type Input<'a> = &'a [u8];
type Parsed<'a, T> = IResult<Input<'a>, T, Fail>;

fn reject<T>(kind: DecodeError) -> Parsed<'static, T> {
    Err(nom::Err::Failure(Fail { kind }))
}

struct Header {
    opcode: Opcode,
    kind: u8,
    corr_id: u32,
    len: u32,
}

fn header(input: Input<'_>) -> Parsed<'_, Header> {
    let (input, opcode) = le_u8(input)?;
    let (input, kind) = le_u8(input)?;
    let (input, corr_id) = le_u32(input)?;
    let (input, len) = le_u32(input)?;
    let opcode = match Opcode::from_u8(opcode) {
        Some(op) => op,
        None => return reject(DecodeError::UnknownOpcode(opcode)),
    };
    if kind != KIND_REQUEST && kind != KIND_RESPONSE {
        return reject(DecodeError::BadKind(kind));
    }
    if len > MAX_PAYLOAD {
        return reject(DecodeError::OversizedPayload(len));
    }
    Ok((
        input,
        Header {
            opcode,
            kind,
            corr_id,
            len,
        },
    ))
}

fn string(input: Input<'_>) -> Parsed<'_, String> {
    let (input, len) = le_u16(input)?;
    let (input, bytes) = take(len)(input)?;
    match str::from_utf8(bytes) {
        Ok(s) => Ok((input, s.to_owned())),
        Err(_) => reject(DecodeError::NotUtf8),
    }
}

fn value(input: Input<'_>, prop_type: u16) -> Parsed<'_, PropValue> {
    match prop_type {
        ty::LONG => {
            let (input, v) = le_u32(input)?;
            Ok((input, PropValue::Long(v)))
        }
        ty::ID => {
            let (input, v) = le_u64(input)?;
            Ok((input, PropValue::Id(v)))
        }
        ty::STRING => {
            let (input, s) = string(input)?;
            Ok((input, PropValue::String(s)))
        }
        ty::TIME => {
            let (input, millis) = le_i64(input)?;
            match DateTime::from_timestamp_millis(millis) {
                Some(t) => Ok((input, PropValue::Time(t))),
                None => reject(DecodeError::BadTimestamp(millis)),
            }
        }
        ty::BINARY => {
            let (input, len) = le_u32(input)?;
            let (input, bytes) = take(len)(input)?;
            Ok((input, PropValue::Binary(bytes.to_vec())))
        }
        ty::ID_ARRAY => {
            let (mut input, count) = le_u16(input)?;
            let mut ids = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                let (rest, id) = le_u64(input)?;
                input = rest;
                ids.push(id);
            }
            Ok((input, PropValue::IdArray(ids)))
        }
        ty::STRING_ARRAY => {
            let (mut input, count) = le_u16(input)?;
            let mut items = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                let (rest, s) = string(input)?;
                input = rest;
                items.push(s);
            }
            Ok((input, PropValue::StringArray(items)))
        }
        other => reject(DecodeError::UnknownPropType(other)),
    }
}

fn prop(input: Input<'_>) -> Parsed<'_, Prop> {
    let (input, tag) = le_u32(input)?;
    let id = (tag >> 16) as u16;
    let prop_type = (tag & 0xFFFF) as u16;
    let (input, value) = value(input, prop_type)?;
    Ok((input, Prop { id, value }))
}

fn props(input: Input<'_>) -> Parsed<'_, Vec<Prop>> {
    let (mut input, count) = le_u16(input)?;
    let mut props = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let (rest, p) = prop(input)?;
        input = rest;
        props.push(p);
    }
    Ok((input, props))
}

fn run<'a, T>(result: Parsed<'a, T>) -> Result<(Input<'a>, T), DecodeError> {
    match result {
        Ok((rest, value)) => Ok((rest, value)),
        Err(nom::Err::Incomplete(_)) => Err(DecodeError::Truncated),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(e.kind),
    }
}

fn split_payload(rest: Input<'_>, len: u32) -> Result<Input<'_>, DecodeError> {
    let len = len as usize;
    if rest.len() < len {
        return Err(DecodeError::Truncated);
    }
    if rest.len() > len {
        return Err(DecodeError::TrailingBytes(rest.len() - len));
    }
    Ok(rest)
}

/// Decodes a complete request frame (the server side of the codec).
pub fn decode_request(buf: &[u8]) -> Result<Request, DecodeError> {
    let (rest, header) = run(header(buf))?;
    if header.kind != KIND_REQUEST {
        return Err(DecodeError::BadKind(header.kind));
    }
    let payload = split_payload(rest, header.len)?;
    let (rest, props) = run(props(payload))?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes(rest.len()));
    }
    Ok(Request {
        opcode: header.opcode,
        corr_id: header.corr_id,
        props,
    })
}

/// Decodes a complete response frame.
pub fn decode_response(buf: &[u8]) -> Result<Response, DecodeError> {
    let (rest, header) = run(header(buf))?;
    if header.kind != KIND_RESPONSE {
        return Err(DecodeError::BadKind(header.kind));
    }
    let payload = split_payload(rest, header.len)?;
    let (payload, status) = run(le_u32::<Input<'_>, Fail>(payload))?;
    let (rest, props) = run(props(payload))?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes(rest.len()));
    }
    Ok(Response {
        opcode: header.opcode,
        corr_id: header.corr_id,
        status: Status(status),
        props,
    })
}
