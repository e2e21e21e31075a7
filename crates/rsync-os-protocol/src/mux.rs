//! Multiplexed stream demultiplexing.
//!
//! Once the handshake is done the daemon wraps everything it sends in frames:
//! a 4-byte little-endian header whose high byte is `MPLEX_BASE + code` and
//! whose low 24 bits are the payload length. Data frames carry the protocol
//! byte stream; every other code carries a diagnostic line.

use std::fmt;
use std::io::{self, Read, Write};

use thiserror::Error;
use tracing::{error, info, warn};

pub const MPLEX_BASE: u8 = 7;
pub const HEADER_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = 0x00FF_FFFF;

/// Message codes carried in the frame tag.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum MessageCode {
    Data = 0,
    ErrorXfer = 1,
    Info = 2,
    Error = 3,
    Warning = 4,
    ErrorSocket = 5,
    Log = 6,
    Client = 7,
    ErrorUtf8 = 8,
    Redo = 9,
    Stats = 10,
    IoError = 22,
    IoTimeout = 33,
    NoOp = 42,
    ErrorExit = 86,
    Success = 100,
    Deleted = 101,
    NoSend = 102,
}

impl MessageCode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Data,
            1 => Self::ErrorXfer,
            2 => Self::Info,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::ErrorSocket,
            6 => Self::Log,
            7 => Self::Client,
            8 => Self::ErrorUtf8,
            9 => Self::Redo,
            10 => Self::Stats,
            22 => Self::IoError,
            33 => Self::IoTimeout,
            42 => Self::NoOp,
            86 => Self::ErrorExit,
            100 => Self::Success,
            101 => Self::Deleted,
            102 => Self::NoSend,
            _ => return None,
        })
    }

    /// Upstream mnemonic, e.g. `MSG_WARNING`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Data => "MSG_DATA",
            Self::ErrorXfer => "MSG_ERROR_XFER",
            Self::Info => "MSG_INFO",
            Self::Error => "MSG_ERROR",
            Self::Warning => "MSG_WARNING",
            Self::ErrorSocket => "MSG_ERROR_SOCKET",
            Self::Log => "MSG_LOG",
            Self::Client => "MSG_CLIENT",
            Self::ErrorUtf8 => "MSG_ERROR_UTF8",
            Self::Redo => "MSG_REDO",
            Self::Stats => "MSG_STATS",
            Self::IoError => "MSG_IO_ERROR",
            Self::IoTimeout => "MSG_IO_TIMEOUT",
            Self::NoOp => "MSG_NOOP",
            Self::ErrorExit => "MSG_ERROR_EXIT",
            Self::Success => "MSG_SUCCESS",
            Self::Deleted => "MSG_DELETED",
            Self::NoSend => "MSG_NO_SEND",
        }
    }

    pub const fn is_error(self) -> bool {
        matches!(
            self,
            Self::ErrorXfer | Self::Error | Self::ErrorSocket | Self::ErrorUtf8 | Self::ErrorExit
        )
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A frame header that cannot belong to a well-formed multiplexed stream.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FramingError {
    #[error("multiplexed header contained invalid tag byte {0}")]
    InvalidTag(u8),

    #[error("unknown multiplexed message code {0}")]
    UnknownCode(u8),

    #[error("multiplexed payload length {0} exceeds maximum {MAX_PAYLOAD_LEN}")]
    OversizedPayload(usize),
}

impl From<FramingError> for io::Error {
    fn from(err: FramingError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

fn decode_header(bytes: [u8; HEADER_LEN]) -> Result<(MessageCode, usize), FramingError> {
    let raw = u32::from_le_bytes(bytes);
    let tag = (raw >> 24) as u8;
    let len = (raw & MAX_PAYLOAD_LEN as u32) as usize;

    let code = tag.checked_sub(MPLEX_BASE).ok_or(FramingError::InvalidTag(tag))?;
    let code = MessageCode::from_u8(code).ok_or(FramingError::UnknownCode(code))?;
    Ok((code, len))
}

/// Encode one frame.
pub fn encode_frame(code: MessageCode, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FramingError::OversizedPayload(payload.len()));
    }
    let tag = u32::from(MPLEX_BASE + code.as_u8());
    let header = (tag << 24) | payload.len() as u32;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

pub fn write_frame<W: Write>(writer: &mut W, code: MessageCode, payload: &[u8]) -> io::Result<()> {
    let frame = encode_frame(code, payload)?;
    writer.write_all(&frame)
}

/// Default diagnostic sink: route daemon messages into `tracing`.
pub fn log_diagnostic(code: MessageCode, message: &str) {
    if code.is_error() {
        error!(code = %code, "remote: {}", message);
    } else if code == MessageCode::Warning {
        warn!(code = %code, "remote: {}", message);
    } else {
        info!(code = %code, "remote: {}", message);
    }
}

type DiagnosticSink = Box<dyn FnMut(MessageCode, &str) + Send>;

/// `Read` adapter that yields only the payloads of data frames.
///
/// A single `read` may cross several frames and a frame may satisfy several
/// reads. Diagnostic frames are handed to the sink, in order, and never
/// surface as bytes.
pub struct MuxReader<R> {
    inner: R,
    buffer: Vec<u8>,
    pos: usize,
    sink: DiagnosticSink,
}

impl<R> MuxReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(32 * 1024),
            pos: 0,
            sink: Box::new(log_diagnostic),
        }
    }

    /// Replace the diagnostic sink.
    pub fn set_diagnostic_sink<F>(&mut self, sink: F)
    where
        F: FnMut(MessageCode, &str) + Send + 'static,
    {
        self.sink = Box::new(sink);
    }

    /// Bytes of the current data frame not yet handed out.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> MuxReader<R> {
    /// Read a header, or `None` on a clean end of stream between frames.
    fn read_header(&mut self) -> io::Result<Option<[u8; HEADER_LEN]>> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            match self.inner.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "multiplexed header truncated",
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Some(header))
    }

    /// Pull the next frame. Returns `false` at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        loop {
            let Some(header) = self.read_header()? else {
                return Ok(false);
            };
            let (code, len) = decode_header(header)?;

            self.buffer.clear();
            self.buffer.resize(len, 0);
            self.pos = 0;
            self.inner.read_exact(&mut self.buffer)?;

            if code == MessageCode::Data {
                if len > 0 {
                    return Ok(true);
                }
                continue;
            }

            let text = String::from_utf8_lossy(&self.buffer);
            (self.sink)(code, text.trim_end_matches('\n'));
            self.buffer.clear();
        }
    }
}

impl<R: Read> Read for MuxReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.buffer.len() && !self.fill()? {
            return Ok(0);
        }

        let n = (self.buffer.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
