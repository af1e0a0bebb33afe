use tokio::io::AsyncBufRead;

use crate::config::Limits;
use crate::frame::Frame;
use crate::wire;
use crate::Result;

/// Reads [`Frame`]s one at a time from a buffered byte stream.
///
/// Each call to [`Decoder::decode`] consumes exactly the bytes of one frame, nested frames
/// included. After an error the stream is most likely misaligned and should be dropped.
pub struct Decoder<R> {
    reader: R,
    limits: Limits,
    // Reused for every header line.
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder::with_limits(reader, Limits::default())
    }

    pub fn with_limits(reader: R, limits: Limits) -> Decoder<R> {
        Decoder {
            reader,
            limits,
            line: Vec::new(),
        }
    }

    /// Reads the next frame.
    ///
    /// `Ok(None)` means the peer sent an empty line (a keep-alive), not end of stream; running out
    /// of input is reported as an `UnexpectedEof` I/O error.
    pub async fn decode(&mut self) -> Result<Option<Frame>> {
        wire::read_value(&mut self.reader, &mut self.line, &self.limits).await
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Decodes a single frame from `reader` with the default [`Limits`].
pub async fn decode<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    Decoder::new(reader).decode().await
}
