//! TLV8 wire framing: the tag/length/value encoding HAP uses for every
//! Pair-Setup (and, in later stages of the protocol, Pair-Verify) message
//! body.
//!
//! Wire-level decode/encode is modeled directly on HAP's own reference
//! behaviour (coalescing of repeated tags, the `0xFF` separator escape
//! hatch, silent skipping of unknown tags); the typed `Value` wrapper
//! around it follows the shape of the upstream `hap` crate's
//! `protocol::tlv` module.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use failure::Fail;

/// Registered TLV tags and their payload semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Type {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    Flags = 0x13,
    Separator = 0xFF,
}

impl Type {
    fn from_u8(tag: u8) -> Option<Type> {
        match tag {
            0x00 => Some(Type::Method),
            0x01 => Some(Type::Identifier),
            0x02 => Some(Type::Salt),
            0x03 => Some(Type::PublicKey),
            0x04 => Some(Type::Proof),
            0x05 => Some(Type::EncryptedData),
            0x06 => Some(Type::State),
            0x07 => Some(Type::Error),
            0x08 => Some(Type::RetryDelay),
            0x09 => Some(Type::Certificate),
            0x0A => Some(Type::Signature),
            0x0B => Some(Type::Permissions),
            0x0C => Some(Type::FragmentData),
            0x0D => Some(Type::FragmentLast),
            0x13 => Some(Type::Flags),
            0xFF => Some(Type::Separator),
            _ => None,
        }
    }
}

/// A decoded or to-be-encoded TLV item, typed per the tag table in the
/// spec. Integer payloads are widened to `u64` and always re-encoded at
/// minimal width (zero encodes to an empty byte string).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Method(u64),
    Identifier(String),
    Salt(Vec<u8>),
    PublicKey(Vec<u8>),
    Proof(Vec<u8>),
    EncryptedData(Vec<u8>),
    State(u64),
    Error(u64),
    RetryDelay(u64),
    Certificate(Vec<u8>),
    Signature(Vec<u8>),
    Permissions(u64),
    FragmentData(Vec<u8>),
    FragmentLast(Vec<u8>),
    Flags(u64),
}

impl Value {
    pub fn tag(&self) -> Type {
        match self {
            Value::Method(_) => Type::Method,
            Value::Identifier(_) => Type::Identifier,
            Value::Salt(_) => Type::Salt,
            Value::PublicKey(_) => Type::PublicKey,
            Value::Proof(_) => Type::Proof,
            Value::EncryptedData(_) => Type::EncryptedData,
            Value::State(_) => Type::State,
            Value::Error(_) => Type::Error,
            Value::RetryDelay(_) => Type::RetryDelay,
            Value::Certificate(_) => Type::Certificate,
            Value::Signature(_) => Type::Signature,
            Value::Permissions(_) => Type::Permissions,
            Value::FragmentData(_) => Type::FragmentData,
            Value::FragmentLast(_) => Type::FragmentLast,
            Value::Flags(_) => Type::Flags,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Value::Method(v) | Value::State(v) | Value::Error(v) | Value::RetryDelay(v)
            | Value::Permissions(v) | Value::Flags(v) => encode_uint(*v),
            Value::Identifier(s) => s.clone().into_bytes(),
            Value::Salt(b) | Value::PublicKey(b) | Value::Proof(b) | Value::EncryptedData(b)
            | Value::Certificate(b) | Value::Signature(b) | Value::FragmentData(b)
            | Value::FragmentLast(b) => b.clone(),
        }
    }

    fn from_tag(tag: Type, payload: Vec<u8>) -> Result<Value, DecodeError> {
        Ok(match tag {
            Type::Method => Value::Method(decode_uint(&payload)?),
            Type::Identifier => {
                Value::Identifier(String::from_utf8(payload).map_err(|_| DecodeError::BadUtf8)?)
            },
            Type::Salt => Value::Salt(payload),
            Type::PublicKey => Value::PublicKey(payload),
            Type::Proof => Value::Proof(payload),
            Type::EncryptedData => Value::EncryptedData(payload),
            Type::State => Value::State(decode_uint(&payload)?),
            Type::Error => Value::Error(decode_uint(&payload)?),
            Type::RetryDelay => Value::RetryDelay(decode_uint(&payload)?),
            Type::Certificate => Value::Certificate(payload),
            Type::Signature => Value::Signature(payload),
            Type::Permissions => Value::Permissions(decode_uint(&payload)?),
            Type::FragmentData => Value::FragmentData(payload),
            Type::FragmentLast => Value::FragmentLast(payload),
            Type::Flags => Value::Flags(decode_uint(&payload)?),
            Type::Separator => return Err(DecodeError::BadSeparator),
        })
    }
}

/// Minimal-width little-endian encoding of an unsigned integer; zero maps
/// to the empty byte string.
fn encode_uint(value: u64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let len = ((64 - value.leading_zeros()) as usize + 7) / 8;
    let mut buf = vec![0u8; 8];
    LittleEndian::write_u64(&mut buf, value);
    buf.truncate(len);
    buf
}

fn decode_uint(payload: &[u8]) -> Result<u64, DecodeError> {
    if payload.is_empty() {
        return Ok(0);
    }
    if payload.len() > 8 {
        return Err(DecodeError::IntegerTooWide);
    }
    let mut buf = [0u8; 8];
    buf[..payload.len()].copy_from_slice(payload);
    Ok(LittleEndian::read_u64(&buf))
}

/// Decoding failures: these are distinct from the in-band `Error` codes
/// of `§4.3` — a malformed byte stream never produces a 200 response,
/// it is rejected before the Pair-Setup state machine ever sees it.
#[derive(Debug, Fail, PartialEq, Eq)]
pub enum DecodeError {
    #[fail(display = "TLV value must be at least two bytes long")]
    Truncated,
    #[fail(display = "separator TLV item must be zero-length")]
    BadSeparator,
    #[fail(display = "TLV integer payload wider than 8 bytes")]
    IntegerTooWide,
    #[fail(display = "TLV identifier payload is not valid UTF-8")]
    BadUtf8,
}

/// Ordered sequence of TLV values. Order matters: repeated tags separated
/// by an explicit `0xFF` stay distinct entries, while adjacent same-tag
/// fragments without a separator are coalesced into one.
pub type Container = Vec<Value>;

/// Look up the first value of a given tag without removing it.
pub fn find(container: &Container, tag: Type) -> Option<&Value> {
    container.iter().find(|v| v.tag() == tag)
}

/// Remove and return the first value of a given tag.
pub fn take(container: &mut Container, tag: Type) -> Option<Value> {
    let idx = container.iter().position(|v| v.tag() == tag)?;
    Some(container.remove(idx))
}

/// Decode a TLV8 byte stream into an ordered sequence of typed values.
/// Unknown tags are silently dropped, as mandated by the spec.
pub fn decode(data: &[u8]) -> Result<Container, DecodeError> {
    let mut out = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(DecodeError::Truncated);
        }
        let tag = rest[0];
        let len = rest[1] as usize;
        if rest.len() < 2 + len {
            return Err(DecodeError::Truncated);
        }
        if tag == Type::Separator as u8 {
            if len != 0 {
                return Err(DecodeError::BadSeparator);
            }
            rest = &rest[2..];
            continue;
        }

        let mut value = rest[2..2 + len].to_vec();
        rest = &rest[2 + len..];

        // Coalesce immediately-following fragments of the same tag.
        while rest.len() >= 2 && rest[0] == tag {
            let frag_len = rest[1] as usize;
            if rest.len() < 2 + frag_len {
                return Err(DecodeError::Truncated);
            }
            value.extend_from_slice(&rest[2..2 + frag_len]);
            rest = &rest[2 + frag_len..];
        }

        if let Some(known) = Type::from_u8(tag) {
            match Value::from_tag(known, value) {
                Ok(v) => out.push(v),
                Err(_) => continue, // malformed payload for a known tag: drop, per decode tolerance
            }
        }
        // Unknown tags are discarded per spec.
    }

    Ok(out)
}

/// Encode a sequence of values to TLV8 bytes. Values longer than 255
/// bytes are fragmented; a `0xFF` separator is inserted whenever two
/// adjacent entries share the same tag, so that decoding the result
/// reproduces distinct entries rather than coalescing them.
pub fn encode(values: &Container) -> Vec<u8> {
    let mut out = Vec::new();

    for (i, value) in values.iter().enumerate() {
        let tag = value.tag() as u8;
        let payload = value.payload();

        if payload.is_empty() {
            out.push(tag);
            out.push(0);
        } else {
            for chunk in payload.chunks(255) {
                out.push(tag);
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
        }

        if let Some(next) = values.get(i + 1) {
            if next.tag() == value.tag() {
                out.push(Type::Separator as u8);
                out.push(0);
            }
        }
    }

    out
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// In-band Pair-Setup protocol errors (spec §4.3/§7). These never become
/// an HTTP error status; they are carried as `(State, Error)` TLV pairs
/// in an otherwise-200 response.
#[derive(Debug, Fail, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[fail(display = "unknown request")]
    Unknown = 1,
    #[fail(display = "authentication failed")]
    Authentication = 2,
    #[fail(display = "client must look at retry delay")]
    Backoff = 3,
    #[fail(display = "server cannot accept any more pairings")]
    MaxPeers = 4,
    #[fail(display = "server reached its maximum number of authentication attempts")]
    MaxTries = 5,
    #[fail(display = "server pairing method is unavailable")]
    Unavailable = 6,
    #[fail(display = "server is busy with another pairing attempt")]
    Busy = 7,
}

impl From<::std::io::Error> for Error {
    fn from(_: ::std::io::Error) -> Error { Error::Authentication }
}

impl From<::srp::types::SrpAuthError> for Error {
    fn from(_: ::srp::types::SrpAuthError) -> Error { Error::Authentication }
}

impl From<DecodeError> for Error {
    fn from(_: DecodeError) -> Error { Error::Unknown }
}

impl From<::failure::Error> for Error {
    fn from(_: ::failure::Error) -> Error { Error::Unknown }
}

/// A `(State, Error)` pair, ready to be turned into a TLV response body.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContainer {
    pub state: u64,
    pub error: Error,
}

impl ErrorContainer {
    pub fn new(state: u8, error: Error) -> ErrorContainer {
        ErrorContainer { state: state as u64, error }
    }

    pub fn into_container(self) -> Container {
        vec![Value::State(self.state), Value::Error(self.error as u64)]
    }
}
