// ABOUTME: Demultiplexer for the engine's framed exec output (non-TTY execs only)
//
// Each frame is an 8-byte header followed by a payload:
// - byte 0: stream type (0 = stdin, 1 = stdout, 2 = stderr)
// - bytes 4..8: big-endian u32 payload length
//
// TTY execs are not framed; their bytes go straight to the terminal.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;

pub const HEADER_LEN: usize = 8;

/// Upper bound on what a frame header alone can make the buffer reserve
const MAX_RESERVE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }
}

/// One decoded frame. `stream` is `None` for unknown stream types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxFrame {
    pub stream: Option<StreamKind>,
    pub payload: Bytes,
}

/// Split one complete frame off the front of `buf`, if there is one
fn take_frame(buf: &mut BytesMut) -> Option<DemuxFrame> {
    if buf.len() < HEADER_LEN {
        return None;
    }

    let stream = StreamKind::from_byte(buf[0]);
    let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

    if buf.len() < HEADER_LEN + len {
        // The length is untrusted until the payload shows up
        buf.reserve((HEADER_LEN + len - buf.len()).min(MAX_RESERVE));
        return None;
    }

    buf.advance(HEADER_LEN);
    let payload = buf.split_to(len).freeze();

    Some(DemuxFrame { stream, payload })
}

/// Encode a payload as a single engine frame
pub fn encode_frame(stream: StreamKind, payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&[stream.as_byte(), 0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// Push-style demultiplexer.
///
/// Feed it chunks as they arrive from the transport; complete frames are
/// dispatched to the stdout/stderr callbacks in arrival order, partial
/// frames stay buffered until the rest shows up.
pub struct Demuxer<O, E>
where
    O: FnMut(Bytes),
    E: FnMut(Bytes),
{
    buffer: BytesMut,
    on_stdout: O,
    on_stderr: E,
}

impl<O, E> Demuxer<O, E>
where
    O: FnMut(Bytes),
    E: FnMut(Bytes),
{
    pub fn new(on_stdout: O, on_stderr: E) -> Self {
        Self {
            buffer: BytesMut::new(),
            on_stdout,
            on_stderr,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);

        while let Some(frame) = take_frame(&mut self.buffer) {
            match frame.stream {
                Some(StreamKind::Stdout) => (self.on_stdout)(frame.payload),
                Some(StreamKind::Stderr) => (self.on_stderr)(frame.payload),
                Some(StreamKind::Stdin) | None => {}
            }
        }
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Codec form of the demultiplexer for use with `FramedRead`
#[derive(Debug, Default, Clone, Copy)]
pub struct DemuxCodec;

impl Decoder for DemuxCodec {
    type Item = DemuxFrame;
    type Error = DemuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(take_frame(src))
    }
}
