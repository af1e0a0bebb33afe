//! Command serialization.
//!
//! Clients send commands as a multi-bulk of bulk strings, whatever the type of each argument:
//! `SET counter 10` goes out as `*3\r\n$3\r\nSET\r\n$7\r\ncounter\r\n$2\r\n10\r\n`.

use std::any::{type_name, Any};
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::frame::FrameType;
use crate::wire;
use crate::{Error, Result};

/// A single command argument.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    /// Sent as an empty bulk string, not as a null.
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Bytes),
}

impl Arg {
    /// Renders any `Display` value as a text argument.
    pub fn display(value: impl fmt::Display) -> Arg {
        Arg::Bytes(Bytes::from(value.to_string()))
    }

    /// Converts a value whose type is only known at runtime.
    ///
    /// Fails with [`Error::UnsupportedArgument`] naming the type when it isn't one of the
    /// primitive kinds an argument can hold.
    pub fn from_any<T: Any>(value: &T) -> Result<Arg> {
        let value = value as &dyn Any;

        macro_rules! downcast {
            ($($ty:ty),* $(,)?) => {
                $(
                    if let Some(v) = value.downcast_ref::<$ty>() {
                        return Ok(Arg::from(v.clone()));
                    }
                )*
            };
        }

        downcast!(
            bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, String,
            &'static str, Vec<u8>, &'static [u8], Bytes, Arg,
        );

        if value.is::<()>() {
            return Ok(Arg::Nil);
        }

        Err(Error::UnsupportedArgument(type_name::<T>()))
    }

    /// Appends the argument as a bulk string.
    pub(crate) fn encode_into(&self, dst: &mut BytesMut) {
        match self {
            Arg::Nil => wire::put_bulk(dst, b""),
            Arg::Bool(true) => wire::put_bulk(dst, b"1"),
            Arg::Bool(false) => wire::put_bulk(dst, b"0"),
            Arg::Int(n) => wire::put_bulk(dst, itoa::Buffer::new().format(*n).as_bytes()),
            // `Display` for floats is the shortest text that parses back to the same value and
            // never switches to exponent notation.
            Arg::Float(n) => wire::put_bulk(dst, n.to_string().as_bytes()),
            Arg::Bytes(data) => wire::put_bulk(dst, data),
        }
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                // Values above i64::MAX wrap around, as a two's complement cast would.
                #[allow(clippy::cast_possible_wrap)]
                fn from(value: $ty) -> Self {
                    Arg::Int(value as i64)
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<f32> for Arg {
    fn from(value: f32) -> Self {
        Arg::Float(f64::from(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Bytes(Bytes::from(value))
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::from(value.as_str())
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(value: &[u8; N]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg::Bytes(value)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Nil, Into::into)
    }
}

/// Builds a `Vec<Arg>` from values of mixed types.
///
/// ```
/// use respio::{args, Arg};
///
/// let args = args!["SET", "counter", 10];
/// assert_eq!(args[2], Arg::Int(10));
/// ```
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::encode::Arg::from($arg)),*]
    };
}

/// Serializes `args` as a command: a multi-bulk with one bulk string per argument.
pub fn encode(args: &[Arg]) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 * (args.len() + 1));
    encode_into(&mut buf, args);
    buf.freeze()
}

pub fn encode_into(dst: &mut BytesMut, args: &[Arg]) {
    wire::put_len(dst, FrameType::Multi.prefix(), args.len());
    for arg in args {
        arg.encode_into(dst);
    }
}

/// Like [`encode_into`], with the command name sent ahead of `args`.
pub fn encode_command_into(dst: &mut BytesMut, name: &str, args: &[Arg]) {
    wire::put_len(dst, FrameType::Multi.prefix(), args.len() + 1);
    wire::put_bulk(dst, name.as_bytes());
    for arg in args {
        arg.encode_into(dst);
    }
}

/// `+<status>\r\n`
pub fn encode_status(status: &str) -> Bytes {
    encode_line(FrameType::Status, status.as_bytes())
}

/// `-<message>\r\n`
pub fn encode_error(message: &str) -> Bytes {
    encode_line(FrameType::Error, message.as_bytes())
}

/// `:<n>\r\n`
pub fn encode_int(n: i64) -> Bytes {
    let mut buf = BytesMut::new();
    wire::put_int(&mut buf, FrameType::Integer.prefix(), n);
    buf.freeze()
}

/// `$<len>\r\n<data>\r\n`, or `$-1\r\n` for `None`.
pub fn encode_bulk(data: Option<&[u8]>) -> Bytes {
    let mut buf = BytesMut::new();
    match data {
        Some(data) => wire::put_bulk(&mut buf, data),
        None => wire::put_null(&mut buf, FrameType::Bulk.prefix()),
    }
    buf.freeze()
}

fn encode_line(frame_type: FrameType, text: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    wire::put_line(&mut buf, frame_type.prefix(), text);
    buf.freeze()
}
