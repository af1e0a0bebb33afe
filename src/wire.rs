//! The RESP grammar, written once.
//!
//! Both read paths (the [`Frame`](crate::frame::Frame) decoder and the connection's
//! [`Reply`](crate::reply::Reply) reader) pull tokens through [`read_value`], and both write paths
//! (the encoder and the connection's command writer) emit bytes through the `put_*` helpers, so
//! the two halves of the crate cannot drift apart on framing details.

use std::io;
use std::str;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::config::Limits;
use crate::error::ProtocolError;
use crate::frame::FrameType;
use crate::{Error, Result};

pub(crate) const CRLF: &[u8; 2] = b"\r\n";

// Upper bound on what a multi-bulk header may make us preallocate.
const MAX_PREALLOC: usize = 1024;

/// One header line, with a bulk payload already attached.
#[derive(Debug, PartialEq)]
pub(crate) enum Token<'a> {
    Status(&'a str),
    Error(&'a str),
    Integer(i64),
    Bulk(Option<Bytes>),
    Multi(Option<usize>),
}

/// A value that can be built from the token stream.
pub(crate) trait Assemble: Sized {
    fn status(text: &str) -> Self;
    fn error(text: &str) -> Self;
    fn integer(n: i64) -> Self;
    fn bulk(data: Option<Bytes>) -> Self;
    fn multi(items: Option<Vec<Self>>) -> Self;
}

/// Reads one complete value.
///
/// Multi-bulk nesting is tracked on an explicit stack rather than by recursion, bounded by
/// `limits.max_depth`. `Ok(None)` is returned for a blank line at the top level; a blank line in
/// the middle of a multi-bulk is a protocol error. On error nothing is returned, even if some
/// elements were already read.
pub(crate) async fn read_value<T, R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limits: &Limits,
) -> Result<Option<T>>
where
    T: Assemble,
    R: AsyncBufRead + Unpin,
{
    // (elements read so far, elements expected)
    let mut stack: Vec<(Vec<T>, usize)> = Vec::new();

    'read: loop {
        let token = match read_token(reader, line, limits).await? {
            Some(token) => token,
            None if stack.is_empty() => return Ok(None),
            None => return Err(ProtocolError::ShortLine.into()),
        };

        let mut value = match token {
            Token::Status(text) => T::status(text),
            Token::Error(text) => T::error(text),
            Token::Integer(n) => T::integer(n),
            Token::Bulk(data) => T::bulk(data),
            Token::Multi(Some(0)) => T::multi(Some(Vec::new())),
            Token::Multi(Some(len)) => {
                if stack.len() >= limits.max_depth {
                    return Err(ProtocolError::TooDeep(limits.max_depth).into());
                }
                stack.push((Vec::with_capacity(len.min(MAX_PREALLOC)), len));
                continue 'read;
            }
            Token::Multi(None) => T::multi(None),
        };

        while let Some((mut items, len)) = stack.pop() {
            items.push(value);
            if items.len() < len {
                stack.push((items, len));
                continue 'read;
            }
            value = T::multi(Some(items));
        }

        return Ok(Some(value));
    }
}

/// Reads the next header line and, for bulk strings, the payload that follows it.
pub(crate) async fn read_token<'a, R>(
    reader: &mut R,
    line: &'a mut Vec<u8>,
    limits: &Limits,
) -> Result<Option<Token<'a>>>
where
    R: AsyncBufRead + Unpin,
{
    if !read_line(reader, line, limits.max_line_len).await? {
        return Ok(None);
    }

    let line: &'a Vec<u8> = line;
    let (&prefix, rest) = line.split_first().ok_or(ProtocolError::ShortLine)?;
    let frame_type = FrameType::try_from(prefix)?;

    let token = match frame_type {
        FrameType::Status => Token::Status(line_text(rest)?),
        FrameType::Error => Token::Error(line_text(rest)?),
        FrameType::Integer => Token::Integer(parse_int(rest)?),
        FrameType::Bulk => match parse_len(rest)? {
            Some(len) => Token::Bulk(Some(read_bulk(reader, len, limits.max_bulk_len).await?)),
            None => Token::Bulk(None),
        },
        FrameType::Multi => Token::Multi(parse_len(rest)?),
    };

    Ok(Some(token))
}

/// Reads a `\n` terminated line into `line`, without its `\r\n`.
///
/// Returns `false` for a blank line, one too short to hold anything but a terminator, which
/// callers may treat as a keep-alive.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, max_len: usize) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        let (used, done) = match memchr::memchr(b'\n', available) {
            Some(index) => (index + 1, true),
            None => (available.len(), false),
        };
        line.extend_from_slice(&available[..used]);
        reader.consume(used);

        if line.len() > max_len {
            return Err(ProtocolError::LongLine.into());
        }
        if done {
            break;
        }
    }

    // Too short to hold a prefix and a terminator.
    if line.len() <= CRLF.len() {
        line.clear();
        return Ok(false);
    }
    if !line.ends_with(CRLF) {
        return Err(ProtocolError::BadTerminator.into());
    }
    line.truncate(line.len() - CRLF.len());

    Ok(true)
}

async fn read_bulk<R>(reader: &mut R, len: usize, max_len: usize) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    if len > max_len {
        return Err(ProtocolError::BulkTooLarge(len).into());
    }

    let mut buf = BytesMut::zeroed(len + CRLF.len());
    reader.read_exact(&mut buf).await.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::from(ProtocolError::TruncatedBulk),
        _ => Error::from(e),
    })?;

    if !buf.ends_with(CRLF) {
        return Err(ProtocolError::BadBulkFormat.into());
    }
    buf.truncate(len);

    Ok(buf.freeze())
}

fn line_text(p: &[u8]) -> Result<&str, ProtocolError> {
    str::from_utf8(p).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Parses a bulk string or multi-bulk length. `-1` is the null marker.
pub(crate) fn parse_len(p: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if p.is_empty() {
        return Err(ProtocolError::MalformedLength);
    }
    if p == b"-1" {
        return Ok(None);
    }

    p.iter()
        .try_fold(0usize, |n, &b| {
            if !b.is_ascii_digit() {
                return Err(ProtocolError::IllegalLength);
            }
            n.checked_mul(10)
                .and_then(|n| n.checked_add(usize::from(b - b'0')))
                .ok_or(ProtocolError::MalformedLength)
        })
        .map(Some)
}

/// Parses the body of an integer reply.
pub(crate) fn parse_int(p: &[u8]) -> Result<i64, ProtocolError> {
    let text = line_text(p)?;
    text.parse::<i64>()
        .map_err(|e| ProtocolError::MalformedInteger {
            text: text.to_string(),
            reason: e.to_string(),
        })
}

/// `<prefix><len>\r\n`
pub(crate) fn put_len(dst: &mut BytesMut, prefix: u8, len: usize) {
    put_line(dst, prefix, itoa::Buffer::new().format(len).as_bytes());
}

/// `<prefix><n>\r\n`
pub(crate) fn put_int(dst: &mut BytesMut, prefix: u8, n: i64) {
    put_line(dst, prefix, itoa::Buffer::new().format(n).as_bytes());
}

/// `<prefix><text>\r\n`, used for status, error and integer lines.
pub(crate) fn put_line(dst: &mut BytesMut, prefix: u8, text: &[u8]) {
    dst.reserve(1 + text.len() + CRLF.len());
    dst.put_u8(prefix);
    dst.put_slice(text);
    dst.put_slice(CRLF);
}

/// `$<len>\r\n<data>\r\n`
pub(crate) fn put_bulk(dst: &mut BytesMut, data: &[u8]) {
    put_len(dst, FrameType::Bulk.prefix(), data.len());
    dst.reserve(data.len() + CRLF.len());
    dst.put_slice(data);
    dst.put_slice(CRLF);
}

/// `<prefix>-1\r\n`
pub(crate) fn put_null(dst: &mut BytesMut, prefix: u8) {
    put_line(dst, prefix, b"-1");
}
