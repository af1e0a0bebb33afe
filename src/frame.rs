// https://redis.io/docs/reference/protocol-spec

use std::collections::HashMap;
use std::fmt;
use std::str;

use bytes::{Bytes, BytesMut};
use itertools::Itertools;

use crate::error::ProtocolError;
use crate::wire::{self, Assemble};
use crate::{Error, Result};

/// One RESP2 reply as read off the wire by the [`Decoder`](crate::decode::Decoder).
///
/// Bulk strings and multi-bulks have a null form (`$-1`, `*-1`) that is distinct from the empty
/// one (`$0`, `*0`); `None` is the null form.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Error(String),
    Status(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Multi(Option<Vec<Frame>>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    Error,   // '-'
    Status,  // '+'
    Integer, // ':'
    Bulk,    // '$'
    Multi,   // '*'
}

impl FrameType {
    /// The first byte of every frame of this type.
    pub const fn prefix(self) -> u8 {
        match self {
            FrameType::Error => b'-',
            FrameType::Status => b'+',
            FrameType::Integer => b':',
            FrameType::Bulk => b'$',
            FrameType::Multi => b'*',
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> std::result::Result<Self, ProtocolError> {
        match byte {
            b'-' => Ok(Self::Error),
            b'+' => Ok(Self::Status),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::Bulk),
            b'*' => Ok(Self::Multi),
            _ => Err(ProtocolError::IllegalData(byte)),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(value: FrameType) -> Self {
        value.prefix()
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Error => "error",
            FrameType::Status => "status",
            FrameType::Integer => "integer",
            FrameType::Bulk => "bulk",
            FrameType::Multi => "multi",
        };
        f.write_str(name)
    }
}

impl Frame {
    pub fn status(s: impl Into<String>) -> Frame {
        Frame::Status(s.into())
    }

    pub fn error(s: impl Into<String>) -> Frame {
        Frame::Error(s.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::Bulk(Some(data.into()))
    }

    pub fn multi(frames: impl IntoIterator<Item = Frame>) -> Frame {
        Frame::Multi(Some(frames.into_iter().collect()))
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Error(_) => FrameType::Error,
            Frame::Status(_) => FrameType::Status,
            Frame::Integer(_) => FrameType::Integer,
            Frame::Bulk(_) => FrameType::Bulk,
            Frame::Multi(_) => FrameType::Multi,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Frame::Multi(_))
    }

    /// Whether this is a null bulk string or a null multi-bulk.
    pub fn is_nil(&self) -> bool {
        matches!(self, Frame::Bulk(None) | Frame::Multi(None))
    }

    /// The raw bytes of a status or bulk reply. A null bulk converts to empty bytes.
    ///
    /// An error frame yields its message as `Err(Error::Server)`.
    pub fn bytes(&self) -> Result<Bytes> {
        match self {
            Frame::Error(msg) => Err(Error::Server(msg.clone())),
            Frame::Status(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Frame::Bulk(data) => Ok(data.clone().unwrap_or_default()),
            Frame::Integer(_) | Frame::Multi(_) => Err(self.conversion("bytes")),
        }
    }

    /// Like [`Frame::bytes`], but the payload has to be UTF-8.
    pub fn text(&self) -> Result<String> {
        match self {
            Frame::Error(msg) => Err(Error::Server(msg.clone())),
            Frame::Status(s) => Ok(s.clone()),
            Frame::Bulk(data) => {
                let data = data.as_deref().unwrap_or_default();
                Ok(str::from_utf8(data)?.to_string())
            }
            Frame::Integer(_) | Frame::Multi(_) => Err(self.conversion("string")),
        }
    }

    /// Integer view of the frame.
    ///
    /// Server errors read as `0` and statuses as `1` for `OK`, `0` otherwise. Bulk strings are
    /// parsed as decimal text.
    pub fn int64(&self) -> Result<i64> {
        match self {
            Frame::Error(_) => Ok(0),
            Frame::Status(s) => Ok(i64::from(s == "OK")),
            Frame::Integer(n) => Ok(*n),
            Frame::Bulk(data) => {
                let data = data.as_deref().unwrap_or_default();
                Ok(str::from_utf8(data)?.parse::<i64>()?)
            }
            Frame::Multi(_) => Err(self.conversion("integer")),
        }
    }

    pub fn int(&self) -> Result<isize> {
        self.int64().map(|n| n as isize)
    }

    /// Boolean view of the frame.
    ///
    /// Server errors read as `false`, `OK` and `PONG` statuses as `true`, integers as `n != 0`.
    /// Bulk strings must hold one of the usual boolean spellings (`1`, `t`, `true`, `0`, ...).
    pub fn boolean(&self) -> Result<bool> {
        match self {
            Frame::Error(_) => Ok(false),
            Frame::Status(s) => Ok(s == "OK" || s == "PONG"),
            Frame::Integer(n) => Ok(*n != 0),
            Frame::Bulk(data) => parse_bool(data.as_deref().unwrap_or_default()),
            Frame::Multi(_) => Err(self.conversion("bool")),
        }
    }

    /// Every element of a multi-bulk as a string. A null multi-bulk gives an empty list.
    pub fn strings(&self) -> Result<Vec<String>> {
        match self {
            Frame::Multi(items) => items.iter().flatten().map(Frame::text).collect(),
            _ => Err(self.conversion("strings")),
        }
    }

    /// Reads a multi-bulk of alternating keys and values, as returned by `HGETALL` or
    /// `CONFIG GET`.
    pub fn string_map(&self) -> Result<HashMap<String, String>> {
        let items = match self {
            Frame::Multi(items) => items.as_deref().unwrap_or_default(),
            _ => return Err(self.conversion("string map")),
        };

        if items.len() % 2 != 0 {
            return Err(Error::OddMapLength(items.len()));
        }

        items
            .iter()
            .tuples::<(_, _)>()
            .map(|(key, value)| Ok((key.text()?, value.text()?)))
            .collect()
    }

    /// Serializes the frame back to its wire form.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        let prefix = self.frame_type().prefix();
        match self {
            Frame::Error(s) | Frame::Status(s) => wire::put_line(dst, prefix, s.as_bytes()),
            Frame::Integer(n) => wire::put_int(dst, prefix, *n),
            Frame::Bulk(Some(data)) => wire::put_bulk(dst, data),
            Frame::Multi(Some(frames)) => {
                wire::put_len(dst, prefix, frames.len());
                for frame in frames {
                    frame.encode_into(dst);
                }
            }
            Frame::Bulk(None) | Frame::Multi(None) => wire::put_null(dst, prefix),
        }
    }

    fn conversion(&self, target: &'static str) -> Error {
        Error::Conversion {
            kind: self.frame_type(),
            target,
        }
    }
}

impl Assemble for Frame {
    fn status(text: &str) -> Self {
        Frame::Status(text.to_string())
    }

    fn error(text: &str) -> Self {
        Frame::Error(text.to_string())
    }

    fn integer(n: i64) -> Self {
        Frame::Integer(n)
    }

    fn bulk(data: Option<Bytes>) -> Self {
        Frame::Bulk(data)
    }

    fn multi(items: Option<Vec<Self>>) -> Self {
        Frame::Multi(items)
    }
}

impl From<Frame> for Bytes {
    fn from(frame: Frame) -> Self {
        frame.to_bytes()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Status(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(Some(bytes)) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Bulk(None) => write!(f, "$-1"),
            Frame::Multi(None) => write!(f, "*-1"),
            Frame::Multi(Some(frames)) => {
                write!(f, "*{}\r\n", frames.len())?;
                for frame in frames {
                    write!(f, "{}\r\n", frame)?;
                }
                Ok(())
            }
        }
    }
}

// Same spellings as Go's strconv.ParseBool, which is what most servers' tooling emits.
fn parse_bool(data: &[u8]) -> Result<bool> {
    match data {
        b"1" | b"t" | b"T" | b"TRUE" | b"true" | b"True" => Ok(true),
        b"0" | b"f" | b"F" | b"FALSE" | b"false" | b"False" => Ok(false),
        _ => Err(Error::InvalidBool(
            String::from_utf8_lossy(data).into_owned(),
        )),
    }
}
